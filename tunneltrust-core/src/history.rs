//! Credential history: cached API endpoints, authorization states, profiles
//! and key pairs, persisted across restarts.
//!
//! Every collection lives in memory and is written through to the backing
//! [`KeyValueStore`] after each mutation. Persistence is best-effort: a
//! failed write is logged and the in-memory state stays authoritative for
//! the rest of the session. A corrupt persisted blob is discarded on load
//! and replaced by an empty collection.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::model::{
    AuthState, AuthorizationType, CredentialGrouping, DiscoveredApi, Provider, SavedAuthState,
    SavedKeyPair, SavedProfile,
};
use crate::store::KeyValueStore;
use crate::ttl_cache::{CacheEntry, TtlCache};

/// Discovered endpoints are re-resolved after thirty days.
pub const DISCOVERED_API_CACHE_TTL_SECONDS: u64 = 30 * 24 * 3600;

const KEY_DISCOVERED_API_CACHE: &str = "history/discovered_api_cache";
const KEY_SAVED_PROFILES: &str = "history/saved_profiles";
const KEY_SAVED_AUTH_STATES: &str = "history/saved_auth_states";
const KEY_SAVED_KEY_PAIRS: &str = "history/saved_key_pairs";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Broadcast after a collection changed and the change was written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    AuthStatesChanged,
    ProfilesChanged,
    KeyPairsChanged,
}

/// The per-device credential cache.
///
/// Mutating operations take `&mut self`: callers serialize access, typically
/// by owning the store behind one async task or lock.
pub struct CredentialHistoryStore {
    storage: Arc<dyn KeyValueStore>,
    discovered_api_cache: TtlCache<DiscoveredApi>,
    saved_profiles: Vec<SavedProfile>,
    saved_auth_states: Vec<SavedAuthState>,
    saved_key_pairs: Vec<SavedKeyPair>,
    events: broadcast::Sender<HistoryEvent>,
}

impl CredentialHistoryStore {
    /// Load the credential history from persistent storage.
    ///
    /// Expired discovered-API entries are purged immediately and the purged
    /// cache is written back, so a long-stopped client starts clean.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let cached_entries: Vec<(String, CacheEntry<DiscoveredApi>)> =
            load_collection(&*storage, KEY_DISCOVERED_API_CACHE);
        let discovered_api_cache =
            TtlCache::from_entries(cached_entries, DISCOVERED_API_CACHE_TTL_SECONDS);
        discovered_api_cache.purge();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            discovered_api_cache,
            saved_profiles: load_collection(&*storage, KEY_SAVED_PROFILES),
            saved_auth_states: load_collection(&*storage, KEY_SAVED_AUTH_STATES),
            saved_key_pairs: load_collection(&*storage, KEY_SAVED_KEY_PAIRS),
            storage,
            events,
        };
        store.save();
        store
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    fn save(&self) {
        save_collection(
            &*self.storage,
            KEY_DISCOVERED_API_CACHE,
            &self.discovered_api_cache.entries(),
        );
        save_collection(&*self.storage, KEY_SAVED_PROFILES, &self.saved_profiles);
        save_collection(
            &*self.storage,
            KEY_SAVED_AUTH_STATES,
            &self.saved_auth_states,
        );
        save_collection(&*self.storage, KEY_SAVED_KEY_PAIRS, &self.saved_key_pairs);
    }

    fn notify(&self, event: HistoryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // --- discovered API endpoints ---

    /// The cached API endpoints for `provider`, if still cached.
    pub fn discovered_api(&self, provider: &Provider) -> Option<DiscoveredApi> {
        self.discovered_api_cache.get(provider.sanitized_base_uri())
    }

    /// Cache the resolved API endpoints for `provider`.
    pub fn cache_discovered_api(&mut self, provider: &Provider, api: DiscoveredApi) {
        self.discovered_api_cache
            .put(provider.sanitized_base_uri(), api);
        self.save();
    }

    /// Drop the cached API endpoints for `provider`.
    pub fn remove_discovered_api(&mut self, provider: &Provider) {
        self.discovered_api_cache
            .remove(provider.sanitized_base_uri());
        self.save();
    }

    // --- authorization states ---

    /// Cache an authorization for `provider`, replacing every entry in the
    /// same credential grouping.
    ///
    /// For a distributed provider this keeps the federation-wide invariant:
    /// at most one distributed authorization exists at any time.
    pub fn cache_auth_state(&mut self, provider: Provider, auth_state: AuthState) {
        let grouping = provider.grouping();
        self.saved_auth_states
            .retain(|saved| !grouping.matches(&saved.provider));
        self.saved_auth_states
            .push(SavedAuthState::new(provider, auth_state));
        self.save();
        self.notify(HistoryEvent::AuthStatesChanged);
    }

    /// Look up a usable authorization for `provider`.
    ///
    /// An entry cached under the provider's exact sanitized base URI always
    /// wins. Failing that, a distributed provider may reuse the
    /// federation-wide authorization; a local provider may not.
    pub fn cached_auth_state(&self, provider: &Provider) -> Option<AuthState> {
        let uri = provider.sanitized_base_uri();
        if let Some(saved) = self
            .saved_auth_states
            .iter()
            .find(|saved| saved.provider.sanitized_base_uri() == uri)
        {
            return Some(saved.auth_state.clone());
        }
        if provider.authorization_type != AuthorizationType::Distributed {
            return None;
        }
        self.saved_auth_states
            .iter()
            .find(|saved| saved.provider.authorization_type == AuthorizationType::Distributed)
            .map(|saved| saved.auth_state.clone())
    }

    /// Every cached authorization for providers of the given category.
    pub fn auth_states_for(&self, authorization_type: AuthorizationType) -> Vec<SavedAuthState> {
        self.saved_auth_states
            .iter()
            .filter(|saved| saved.provider.authorization_type == authorization_type)
            .cloned()
            .collect()
    }

    /// Every cached authorization.
    pub fn saved_auth_states(&self) -> &[SavedAuthState] {
        &self.saved_auth_states
    }

    /// Replace the payload of the stored authorization issued by the same
    /// authorization service, after a silent token refresh.
    ///
    /// A refresh never creates an entry: if no stored authorization matches
    /// the service configuration, the update is dropped with a warning.
    pub fn refresh_auth_state(&mut self, refreshed: AuthState) {
        let Some(saved) = self
            .saved_auth_states
            .iter_mut()
            .find(|saved| saved.auth_state.config == refreshed.config)
        else {
            tracing::warn!("no stored authorization matches the refreshed state; dropping it");
            return;
        };
        saved.auth_state.payload = refreshed.payload;
        self.save();
        self.notify(HistoryEvent::AuthStatesChanged);
    }

    /// Remove every cached authorization in `grouping`.
    pub fn remove_auth_states_for(&mut self, grouping: &CredentialGrouping) {
        let before = self.saved_auth_states.len();
        self.saved_auth_states
            .retain(|saved| !grouping.matches(&saved.provider));
        if self.saved_auth_states.len() != before {
            self.save();
            self.notify(HistoryEvent::AuthStatesChanged);
        }
    }

    // --- saved profiles ---

    /// Remember a materialized profile.
    pub fn cache_saved_profile(&mut self, saved_profile: SavedProfile) {
        self.saved_profiles
            .retain(|existing| *existing != saved_profile);
        self.saved_profiles.push(saved_profile);
        self.save();
        self.notify(HistoryEvent::ProfilesChanged);
    }

    /// The remembered profile for `provider` base URI and profile id, if any.
    pub fn cached_saved_profile(
        &self,
        sanitized_base_uri: &str,
        profile_id: &str,
    ) -> Option<SavedProfile> {
        self.saved_profiles
            .iter()
            .find(|saved| {
                saved.provider.sanitized_base_uri() == sanitized_base_uri
                    && saved.profile.profile_id == profile_id
            })
            .cloned()
    }

    /// Forget one remembered profile, matched structurally.
    pub fn remove_saved_profile(&mut self, saved_profile: &SavedProfile) {
        let before = self.saved_profiles.len();
        self.saved_profiles
            .retain(|existing| existing != saved_profile);
        if self.saved_profiles.len() != before {
            self.save();
            self.notify(HistoryEvent::ProfilesChanged);
        }
    }

    /// Every remembered profile.
    pub fn saved_profiles(&self) -> &[SavedProfile] {
        &self.saved_profiles
    }

    /// Forget every remembered profile in `grouping`.
    pub fn remove_saved_profiles_for(&mut self, grouping: &CredentialGrouping) {
        let before = self.saved_profiles.len();
        self.saved_profiles
            .retain(|saved| !grouping.matches(&saved.provider));
        if self.saved_profiles.len() != before {
            self.save();
            self.notify(HistoryEvent::ProfilesChanged);
        }
    }

    // --- key pairs ---

    /// Store the key pair issued for `provider`, replacing any previous key
    /// pair for the same sanitized base URI.
    ///
    /// Duplicate entries for one URI, left behind by older versions, are
    /// collapsed here as a side effect.
    pub fn store_saved_key_pair(&mut self, saved_key_pair: SavedKeyPair) {
        let uri = saved_key_pair.provider.sanitized_base_uri().to_string();
        let mut replaced = false;
        let mut rebuilt = Vec::with_capacity(self.saved_key_pairs.len() + 1);
        for existing in self.saved_key_pairs.drain(..) {
            if existing.provider.sanitized_base_uri() == uri {
                if replaced {
                    tracing::warn!(base_uri = %uri, "dropping duplicate stored key pair");
                    continue;
                }
                rebuilt.push(saved_key_pair.clone());
                replaced = true;
            } else {
                rebuilt.push(existing);
            }
        }
        if !replaced {
            rebuilt.push(saved_key_pair);
        }
        self.saved_key_pairs = rebuilt;
        self.save();
        self.notify(HistoryEvent::KeyPairsChanged);
    }

    /// The stored key pair for a sanitized base URI, if any.
    pub fn saved_key_pair_for(&self, sanitized_base_uri: &str) -> Option<SavedKeyPair> {
        self.saved_key_pairs
            .iter()
            .find(|saved| saved.provider.sanitized_base_uri() == sanitized_base_uri)
            .cloned()
    }

    /// Every stored key pair.
    pub fn saved_key_pairs(&self) -> &[SavedKeyPair] {
        &self.saved_key_pairs
    }

    /// Remove every stored key pair in `grouping`.
    pub fn remove_key_pairs_for(&mut self, grouping: &CredentialGrouping) {
        let before = self.saved_key_pairs.len();
        self.saved_key_pairs
            .retain(|saved| !grouping.matches(&saved.provider));
        if self.saved_key_pairs.len() != before {
            self.save();
            self.notify(HistoryEvent::KeyPairsChanged);
        }
    }

    // --- cascade removal ---

    /// Remove everything cached for the identity of `provider`: discovered
    /// endpoints, profiles, key pairs and authorizations.
    ///
    /// For a distributed provider this clears the shared federation
    /// credential, so every other distributed provider is signed out too.
    pub fn remove_all_data_for(&mut self, provider: &Provider) {
        let grouping = provider.grouping();
        self.remove_discovered_api(provider);
        self.remove_saved_profiles_for(&grouping);
        self.remove_key_pairs_for(&grouping);
        self.remove_auth_states_for(&grouping);
    }
}

impl std::fmt::Debug for CredentialHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHistoryStore")
            .field("discovered_apis", &self.discovered_api_cache.len())
            .field("saved_profiles", &self.saved_profiles.len())
            .field("saved_auth_states", &self.saved_auth_states.len())
            .field("saved_key_pairs", &self.saved_key_pairs.len())
            .finish()
    }
}

fn load_collection<T>(storage: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let blob = match storage.get(key) {
        Ok(Some(blob)) => blob,
        Ok(None) => return T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted collection");
            return T::default();
        }
    };
    match serde_json::from_str(&blob) {
        Ok(collection) => collection,
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding corrupt persisted collection");
            T::default()
        }
    }
}

fn save_collection<T: Serialize>(storage: &dyn KeyValueStore, key: &str, collection: &T) {
    let blob = match serde_json::to_string(collection) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to serialize collection for persistence");
            return;
        }
    };
    if let Err(e) = storage.put(key, &blob) {
        tracing::warn!(key, error = %e, "failed to persist collection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthorizationServiceConfig, KeyPair, Profile, ProfileHandle};
    use crate::store::MemoryStore;
    use url::Url;

    fn empty_store() -> CredentialHistoryStore {
        CredentialHistoryStore::load(Arc::new(MemoryStore::new()))
    }

    fn auth_state(seed: &str) -> AuthState {
        let config = AuthorizationServiceConfig {
            authorization_endpoint: Url::parse(&format!("https://{}/authorize", seed)).unwrap(),
            token_endpoint: Url::parse(&format!("https://{}/token", seed)).unwrap(),
        };
        AuthState::new(config, format!("payload-{}", seed))
    }

    #[test]
    fn test_cached_auth_state_prefers_exact_uri() {
        let mut store = empty_store();
        let local = Provider::new("https://a.example.org/", AuthorizationType::Local);
        let distributed = Provider::new("https://b.example.org/", AuthorizationType::Distributed);
        store.cache_auth_state(distributed, auth_state("b.example.org"));
        store.cache_auth_state(local.clone(), auth_state("a.example.org"));

        let found = store.cached_auth_state(&local).unwrap();
        assert_eq!(found.payload.expose(), "payload-a.example.org");
    }

    #[test]
    fn test_cached_auth_state_falls_back_to_federation() {
        let mut store = empty_store();
        let distributed = Provider::new("https://b.example.org/", AuthorizationType::Distributed);
        store.cache_auth_state(distributed, auth_state("b.example.org"));

        let other = Provider::new("https://c.example.org/", AuthorizationType::Distributed);
        let found = store.cached_auth_state(&other).unwrap();
        assert_eq!(found.payload.expose(), "payload-b.example.org");

        // A local provider never reuses the federation credential.
        let unknown_local = Provider::new("https://d.example.org/", AuthorizationType::Local);
        assert!(store.cached_auth_state(&unknown_local).is_none());
    }

    #[test]
    fn test_refresh_auth_state_never_creates_entries() {
        let mut store = empty_store();
        store.refresh_auth_state(auth_state("nowhere.example.org"));
        assert!(store.saved_auth_states().is_empty());
    }

    #[test]
    fn test_refresh_auth_state_replaces_payload_only() {
        let mut store = empty_store();
        let provider = Provider::new("https://a.example.org/", AuthorizationType::Local);
        store.cache_auth_state(provider.clone(), auth_state("a.example.org"));
        let stamped = store.saved_auth_states()[0].authenticated_at;

        let mut refreshed = auth_state("a.example.org");
        refreshed.payload = "rotated".into();
        store.refresh_auth_state(refreshed);

        let saved = &store.saved_auth_states()[0];
        assert_eq!(saved.auth_state.payload.expose(), "rotated");
        assert_eq!(saved.authenticated_at, stamped);
        assert_eq!(saved.provider, provider);
    }

    #[test]
    fn test_store_key_pair_replaces_per_uri() {
        let mut store = empty_store();
        let provider = Provider::new("https://a.example.org/", AuthorizationType::Local);
        store.store_saved_key_pair(SavedKeyPair::new(
            provider.clone(),
            KeyPair::new("cert-1", "key-1", true),
        ));
        store.store_saved_key_pair(SavedKeyPair::new(
            provider,
            KeyPair::new("cert-2", "key-2", true),
        ));

        assert_eq!(store.saved_key_pairs().len(), 1);
        let found = store.saved_key_pair_for("https://a.example.org").unwrap();
        assert_eq!(found.key_pair.certificate, "cert-2");
    }

    #[test]
    fn test_saved_profile_dedupes_structurally() {
        let mut store = empty_store();
        let provider = Provider::new("https://a.example.org/", AuthorizationType::Local);
        let handle = ProfileHandle::new();
        let saved = SavedProfile::new(
            provider,
            Profile::new("internet", "Internet Access"),
            handle,
        );
        store.cache_saved_profile(saved.clone());
        store.cache_saved_profile(saved.clone());
        assert_eq!(store.saved_profiles().len(), 1);

        store.remove_saved_profile(&saved);
        assert!(store.saved_profiles().is_empty());
    }
}
