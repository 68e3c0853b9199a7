//! Integration tests for the credential history store: persistence across
//! reloads, credential grouping semantics and cascade removal.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::broadcast::error::TryRecvError;
use url::Url;

use tunneltrust_core::history::{CredentialHistoryStore, HistoryEvent};
use tunneltrust_core::model::{
    AuthState, AuthorizationServiceConfig, AuthorizationType, DiscoveredApi, KeyPair, Profile,
    ProfileHandle, Provider, SavedKeyPair, SavedProfile,
};
use tunneltrust_core::store::{KeyValueStore, MemoryStore};
use tunneltrust_core::ttl_cache::CacheEntry;

fn local_provider(host: &str) -> Provider {
    Provider::new(format!("https://{}/", host), AuthorizationType::Local)
}

fn distributed_provider(host: &str) -> Provider {
    Provider::new(format!("https://{}/", host), AuthorizationType::Distributed)
}

fn auth_state(host: &str) -> AuthState {
    let config = AuthorizationServiceConfig {
        authorization_endpoint: Url::parse(&format!("https://{}/authorize", host)).unwrap(),
        token_endpoint: Url::parse(&format!("https://{}/token", host)).unwrap(),
    };
    AuthState::new(config, format!("payload-{}", host))
}

fn discovered_api(host: &str) -> DiscoveredApi {
    DiscoveredApi {
        api_base_uri: format!("https://{}/api", host),
        authorization_endpoint: Url::parse(&format!("https://{}/authorize", host)).unwrap(),
        token_endpoint: Url::parse(&format!("https://{}/token", host)).unwrap(),
    }
}

#[test]
fn everything_survives_a_reload() {
    let storage = Arc::new(MemoryStore::new());
    let provider = local_provider("vpn.example.org");

    {
        let mut store = CredentialHistoryStore::load(storage.clone());
        store.cache_discovered_api(&provider, discovered_api("vpn.example.org"));
        store.cache_auth_state(provider.clone(), auth_state("vpn.example.org"));
        store.cache_saved_profile(SavedProfile::new(
            provider.clone(),
            Profile::new("internet", "Internet Access"),
            ProfileHandle::new(),
        ));
        store.store_saved_key_pair(SavedKeyPair::new(
            provider.clone(),
            KeyPair::new("cert", "key", true),
        ));
    }

    let reloaded = CredentialHistoryStore::load(storage);
    assert!(reloaded.discovered_api(&provider).is_some());
    assert_eq!(reloaded.saved_auth_states().len(), 1);
    assert_eq!(reloaded.saved_profiles().len(), 1);
    assert_eq!(reloaded.saved_key_pairs().len(), 1);
    assert_eq!(
        reloaded
            .cached_auth_state(&provider)
            .unwrap()
            .payload
            .expose(),
        "payload-vpn.example.org"
    );
}

#[test]
fn at_most_one_distributed_authorization_exists() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    store.cache_auth_state(distributed_provider("a.example.org"), auth_state("a.example.org"));
    store.cache_auth_state(distributed_provider("b.example.org"), auth_state("b.example.org"));

    let distributed = store.auth_states_for(AuthorizationType::Distributed);
    assert_eq!(distributed.len(), 1);
    assert_eq!(
        distributed[0].provider.sanitized_base_uri(),
        "https://b.example.org"
    );
}

#[test]
fn local_authorizations_are_scoped_per_uri() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    store.cache_auth_state(local_provider("a.example.org"), auth_state("a.example.org"));
    store.cache_auth_state(local_provider("b.example.org"), auth_state("b.example.org"));
    // Re-authorizing the same institution replaces, not appends.
    store.cache_auth_state(local_provider("a.example.org"), auth_state("a.example.org"));

    assert_eq!(store.auth_states_for(AuthorizationType::Local).len(), 2);
}

#[test]
fn exact_uri_wins_over_federation_fallback() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    store.cache_auth_state(distributed_provider("home.example.org"), auth_state("home.example.org"));
    store.cache_auth_state(local_provider("inst.example.org"), auth_state("inst.example.org"));

    // The institution's own entry is found first.
    let found = store
        .cached_auth_state(&local_provider("inst.example.org"))
        .unwrap();
    assert_eq!(found.payload.expose(), "payload-inst.example.org");

    // A distributed provider with no entry of its own reuses the federation one.
    let roaming = store
        .cached_auth_state(&distributed_provider("abroad.example.org"))
        .unwrap();
    assert_eq!(roaming.payload.expose(), "payload-home.example.org");
}

#[test]
fn duplicate_key_pairs_collapse_on_store() {
    let storage = Arc::new(MemoryStore::new());
    let provider = local_provider("vpn.example.org");

    // Persist two entries for one URI, as older versions could leave behind.
    let duplicates = vec![
        SavedKeyPair::new(provider.clone(), KeyPair::new("cert-old-1", "key", true)),
        SavedKeyPair::new(provider.clone(), KeyPair::new("cert-old-2", "key", true)),
    ];
    storage
        .put(
            "history/saved_key_pairs",
            &serde_json::to_string(&duplicates).unwrap(),
        )
        .unwrap();

    let mut store = CredentialHistoryStore::load(storage);
    store.store_saved_key_pair(SavedKeyPair::new(
        provider,
        KeyPair::new("cert-new", "key", true),
    ));

    assert_eq!(store.saved_key_pairs().len(), 1);
    assert_eq!(store.saved_key_pairs()[0].key_pair.certificate, "cert-new");
}

#[test]
fn removing_a_distributed_provider_clears_the_federation() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    let home = distributed_provider("home.example.org");
    let other = distributed_provider("other.example.org");
    let institution = local_provider("inst.example.org");

    store.cache_discovered_api(&home, discovered_api("home.example.org"));
    store.cache_auth_state(home.clone(), auth_state("home.example.org"));
    store.cache_auth_state(institution.clone(), auth_state("inst.example.org"));
    store.cache_saved_profile(SavedProfile::new(
        home.clone(),
        Profile::new("internet", "Internet Access"),
        ProfileHandle::new(),
    ));
    store.store_saved_key_pair(SavedKeyPair::new(
        home.clone(),
        KeyPair::new("cert", "key", true),
    ));

    // Signing out via any distributed provider clears the shared credential.
    store.remove_all_data_for(&other);

    assert!(store.discovered_api(&home).is_none());
    assert!(store.auth_states_for(AuthorizationType::Distributed).is_empty());
    assert!(store.saved_profiles().is_empty());
    assert!(store.saved_key_pairs().is_empty());

    // The institution's own credential is untouched.
    assert_eq!(store.auth_states_for(AuthorizationType::Local).len(), 1);
}

#[test]
fn removing_a_local_provider_spares_other_institutions() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    let a = local_provider("a.example.org");
    let b = local_provider("b.example.org");
    store.cache_auth_state(a.clone(), auth_state("a.example.org"));
    store.cache_auth_state(b.clone(), auth_state("b.example.org"));

    store.remove_all_data_for(&a);

    let remaining = store.saved_auth_states();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].provider.sanitized_base_uri(), "https://b.example.org");
}

#[test]
fn expired_discovered_apis_are_purged_at_load() {
    let storage = Arc::new(MemoryStore::new());
    let stale_entries = vec![(
        "https://old.example.org".to_string(),
        CacheEntry {
            inserted_at: Utc::now() - Duration::days(31),
            value: discovered_api("old.example.org"),
        },
    )];
    storage
        .put(
            "history/discovered_api_cache",
            &serde_json::to_string(&stale_entries).unwrap(),
        )
        .unwrap();

    let store = CredentialHistoryStore::load(storage.clone());
    assert!(store.discovered_api(&local_provider("old.example.org")).is_none());

    // The purge was written back, so a second load stays clean.
    let persisted = storage.get("history/discovered_api_cache").unwrap().unwrap();
    let entries: Vec<(String, CacheEntry<DiscoveredApi>)> =
        serde_json::from_str(&persisted).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn corrupt_persisted_blob_loads_as_empty() {
    let storage = Arc::new(MemoryStore::new());
    storage
        .put("history/saved_auth_states", "{not json")
        .unwrap();

    let store = CredentialHistoryStore::load(storage);
    assert!(store.saved_auth_states().is_empty());
}

#[test]
fn mutations_broadcast_change_events() {
    let mut store = CredentialHistoryStore::load(Arc::new(MemoryStore::new()));
    let mut events = store.subscribe();

    store.cache_auth_state(local_provider("a.example.org"), auth_state("a.example.org"));
    assert_eq!(events.try_recv().unwrap(), HistoryEvent::AuthStatesChanged);

    store.store_saved_key_pair(SavedKeyPair::new(
        local_provider("a.example.org"),
        KeyPair::new("cert", "key", true),
    ));
    assert_eq!(events.try_recv().unwrap(), HistoryEvent::KeyPairsChanged);

    // Removing something that isn't there changes nothing and stays silent.
    store.remove_auth_states_for(&local_provider("absent.example.org").grouping());
    assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
}
