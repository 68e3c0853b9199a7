//! Trust-verified discovery list synchronization.
//!
//! Three remote lists are tracked: provider lists for each authorization
//! type and the organization list. A refresh fetches the list document and
//! its detached signature concurrently, verifies the signature against the
//! configured trust roots, and only then parses and publishes the result.
//! A fetched list replaces the cached one only if its version is strictly
//! newer; anything else leaves the previous state untouched.

use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::fetch::{FetchError, Fetcher};
use crate::model::{AuthorizationType, Organization, Provider, VersionedList};
use crate::store::KeyValueStore;
use crate::verify::{SignatureVerifier, VerifyError};

const KEY_SERVER_LIST_LOCAL: &str = "discovery/server_list/local";
const KEY_SERVER_LIST_DISTRIBUTED: &str = "discovery/server_list/distributed";
const KEY_ORGANIZATION_LIST: &str = "discovery/organization_list";

const DEFAULT_SIGNATURE_SUFFIX: &str = ".minisig";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// One of the synchronized discovery lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Providers(AuthorizationType),
    Organizations,
}

impl std::fmt::Display for ListSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListSource::Providers(AuthorizationType::Local) => write!(f, "local server list"),
            ListSource::Providers(AuthorizationType::Distributed) => {
                write!(f, "distributed server list")
            }
            ListSource::Organizations => write!(f, "organization list"),
        }
    }
}

/// What a completed refresh did to the published list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched list was strictly newer and replaced the cached one.
    Updated,
    /// The fetched list was not newer; the cached list was kept.
    Unchanged,
}

/// Broadcast whenever a refresh changes state or fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Updated(ListSource),
    RefreshFailed(ListSource),
}

/// Error type for list synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The signature blob was well-formed but not produced by a trusted key.
    #[error("signature did not verify against any trusted key")]
    UntrustedData,

    /// The signature document was not valid UTF-8.
    #[error("signature document is not valid UTF-8")]
    SignatureEncoding(#[from] std::string::FromUtf8Error),

    /// The list document failed to parse after its signature verified.
    #[error("malformed list document: {0}")]
    Format(#[from] serde_json::Error),
}

/// Where the discovery lists live and how they are fetched.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub local_list_url: String,
    pub distributed_list_url: String,
    pub organization_list_url: String,
    pub signature_suffix: String,
    pub fetch_timeout: Duration,
}

impl DiscoveryConfig {
    pub fn new(
        local_list_url: impl Into<String>,
        distributed_list_url: impl Into<String>,
        organization_list_url: impl Into<String>,
    ) -> Self {
        Self {
            local_list_url: local_list_url.into(),
            distributed_list_url: distributed_list_url.into(),
            organization_list_url: organization_list_url.into(),
            signature_suffix: DEFAULT_SIGNATURE_SUFFIX.to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_signature_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.signature_suffix = suffix.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// The URL of the list document for `source`.
    pub fn list_url(&self, source: ListSource) -> &str {
        match source {
            ListSource::Providers(AuthorizationType::Local) => &self.local_list_url,
            ListSource::Providers(AuthorizationType::Distributed) => &self.distributed_list_url,
            ListSource::Organizations => &self.organization_list_url,
        }
    }

    /// The URL of the detached signature for `source`.
    pub fn signature_url(&self, source: ListSource) -> String {
        format!("{}{}", self.list_url(source), self.signature_suffix)
    }
}

fn storage_key(source: ListSource) -> &'static str {
    match source {
        ListSource::Providers(AuthorizationType::Local) => KEY_SERVER_LIST_LOCAL,
        ListSource::Providers(AuthorizationType::Distributed) => KEY_SERVER_LIST_DISTRIBUTED,
        ListSource::Organizations => KEY_ORGANIZATION_LIST,
    }
}

/// Wire form of a provider list document.
#[derive(Debug, Deserialize)]
struct ServerListDoc {
    v: u64,
    #[serde(default)]
    server_list: Vec<Provider>,
}

/// Wire form of the organization list document.
#[derive(Debug, Deserialize)]
struct OrganizationListDoc {
    v: u64,
    #[serde(default)]
    organization_list: Vec<Organization>,
}

#[derive(Debug, Default)]
struct PublishedLists {
    local: Option<VersionedList<Provider>>,
    distributed: Option<VersionedList<Provider>>,
    organizations: Option<VersionedList<Organization>>,
}

#[derive(Debug, Default)]
struct PendingFlags {
    local: AtomicBool,
    distributed: AtomicBool,
    organizations: AtomicBool,
}

impl PendingFlags {
    fn flag(&self, source: ListSource) -> &AtomicBool {
        match source {
            ListSource::Providers(AuthorizationType::Local) => &self.local,
            ListSource::Providers(AuthorizationType::Distributed) => &self.distributed,
            ListSource::Organizations => &self.organizations,
        }
    }
}

/// Clears the pending flag when the refresh completes, error paths included.
struct PendingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PendingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Keeps the in-memory discovery lists in sync with their signed remote
/// counterparts and persists each accepted list.
pub struct ConfigurationSync {
    config: DiscoveryConfig,
    verifier: SignatureVerifier,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn KeyValueStore>,
    lists: RwLock<PublishedLists>,
    pending: PendingFlags,
    events: broadcast::Sender<SyncEvent>,
}

impl ConfigurationSync {
    /// Create a sync instance, reloading any previously persisted lists.
    ///
    /// A corrupt persisted blob is logged and treated as absent; it never
    /// prevents construction.
    pub fn new(
        config: DiscoveryConfig,
        verifier: SignatureVerifier,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let lists = PublishedLists {
            local: load_list(&*storage, KEY_SERVER_LIST_LOCAL),
            distributed: load_list(&*storage, KEY_SERVER_LIST_DISTRIBUTED),
            organizations: load_list(&*storage, KEY_ORGANIZATION_LIST),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            verifier,
            fetcher,
            storage,
            lists: RwLock::new(lists),
            pending: PendingFlags::default(),
            events,
        }
    }

    /// Subscribe to refresh outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether a refresh of `source` is currently in flight.
    pub fn is_pending(&self, source: ListSource) -> bool {
        self.pending.flag(source).load(Ordering::SeqCst)
    }

    /// The cached providers of the given authorization type.
    pub fn providers(&self, authorization_type: AuthorizationType) -> Vec<Provider> {
        let lists = self.lists.read();
        let list = match authorization_type {
            AuthorizationType::Local => &lists.local,
            AuthorizationType::Distributed => &lists.distributed,
        };
        list.as_ref().map(|l| l.entries.clone()).unwrap_or_default()
    }

    /// The cached organizations.
    pub fn organizations(&self) -> Vec<Organization> {
        let lists = self.lists.read();
        lists
            .organizations
            .as_ref()
            .map(|l| l.entries.clone())
            .unwrap_or_default()
    }

    /// Fetch, verify and merge one list.
    ///
    /// On any error the previously published list stays in place and a
    /// [`SyncEvent::RefreshFailed`] is broadcast. A stale fetched list
    /// completes successfully with [`RefreshOutcome::Unchanged`].
    pub async fn refresh(&self, source: ListSource) -> Result<RefreshOutcome, SyncError> {
        let _guard = PendingGuard::set(self.pending.flag(source));

        match self.refresh_inner(source).await {
            Ok(outcome) => {
                if outcome == RefreshOutcome::Updated {
                    let _ = self.events.send(SyncEvent::Updated(source));
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "list refresh failed");
                let _ = self.events.send(SyncEvent::RefreshFailed(source));
                Err(e)
            }
        }
    }

    async fn refresh_inner(&self, source: ListSource) -> Result<RefreshOutcome, SyncError> {
        let list_url = self.config.list_url(source).to_string();
        let signature_url = self.config.signature_url(source);

        let (document, signature) = tokio::try_join!(
            self.fetch_with_timeout(&list_url),
            self.fetch_with_timeout(&signature_url),
        )?;

        let signature_text = String::from_utf8(signature)?;
        if !self.verifier.verify(&document, &signature_text)? {
            return Err(SyncError::UntrustedData);
        }

        match source {
            ListSource::Providers(authorization_type) => {
                let doc: ServerListDoc = serde_json::from_slice(&document)?;
                let mut entries = doc.server_list;
                for provider in &mut entries {
                    provider.authorization_type = authorization_type;
                }
                let fetched = VersionedList {
                    version: doc.v,
                    entries,
                };
                Ok(self.publish_providers(authorization_type, fetched))
            }
            ListSource::Organizations => {
                let doc: OrganizationListDoc = serde_json::from_slice(&document)?;
                let fetched = VersionedList {
                    version: doc.v,
                    entries: doc.organization_list,
                };
                Ok(self.publish_organizations(fetched))
            }
        }
    }

    async fn fetch_with_timeout(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut { timeout }),
        }
    }

    fn publish_providers(
        &self,
        authorization_type: AuthorizationType,
        fetched: VersionedList<Provider>,
    ) -> RefreshOutcome {
        let mut lists = self.lists.write();
        let slot = match authorization_type {
            AuthorizationType::Local => &mut lists.local,
            AuthorizationType::Distributed => &mut lists.distributed,
        };
        if !is_newer(slot.as_ref().map(|l| l.version), fetched.version) {
            return RefreshOutcome::Unchanged;
        }
        persist_list(
            &*self.storage,
            storage_key(ListSource::Providers(authorization_type)),
            &fetched,
        );
        *slot = Some(fetched);
        RefreshOutcome::Updated
    }

    fn publish_organizations(&self, fetched: VersionedList<Organization>) -> RefreshOutcome {
        let mut lists = self.lists.write();
        if !is_newer(
            lists.organizations.as_ref().map(|l| l.version),
            fetched.version,
        ) {
            return RefreshOutcome::Unchanged;
        }
        persist_list(&*self.storage, KEY_ORGANIZATION_LIST, &fetched);
        lists.organizations = Some(fetched);
        RefreshOutcome::Updated
    }
}

impl std::fmt::Debug for ConfigurationSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationSync")
            .field("config", &self.config)
            .finish()
    }
}

fn is_newer(cached_version: Option<u64>, fetched_version: u64) -> bool {
    match cached_version {
        Some(cached) => fetched_version > cached,
        None => true,
    }
}

fn load_list<T>(storage: &dyn KeyValueStore, key: &str) -> Option<VersionedList<T>>
where
    T: serde::de::DeserializeOwned,
{
    let blob = match storage.get(key) {
        Ok(Some(blob)) => blob,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted list");
            return None;
        }
    };
    match serde_json::from_str(&blob) {
        Ok(list) => Some(list),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding corrupt persisted list");
            None
        }
    }
}

fn persist_list<T: serde::Serialize>(
    storage: &dyn KeyValueStore,
    key: &str,
    list: &VersionedList<T>,
) {
    let blob = match serde_json::to_string(list) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to serialize list for persistence");
            return;
        }
    };
    if let Err(e) = storage.put(key, &blob) {
        tracing::warn!(key, error = %e, "failed to persist list");
    }
}
