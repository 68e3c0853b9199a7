//! # Tunneltrust Core
//!
//! Core library for trust-verified VPN provider discovery and credential
//! caching.
//!
//! This crate provides:
//! - Domain types for providers, organizations, profiles and credentials
//! - Minisign-compatible signature verification for discovery documents
//! - Synchronization of versioned, signed discovery lists
//! - A persistent credential history with TTL-bounded endpoint caching
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tunneltrust_core::{
//!     ConfigurationSync, DiscoveryConfig, HttpFetcher, MemoryStore, SignatureVerifier,
//! };
//!
//! let verifier = SignatureVerifier::from_encoded_keys([
//!     "RWQKqtqvd0R7rUDp0rWzbtYPA3towPWcLDCl7eY9pBMMI/ohCmrS0WiM",
//! ])?;
//! let config = DiscoveryConfig::new(
//!     "https://disco.example.org/server_list.json",
//!     "https://disco.example.org/secure_internet_list.json",
//!     "https://disco.example.org/organization_list.json",
//! );
//! let sync = ConfigurationSync::new(
//!     config,
//!     verifier,
//!     Arc::new(HttpFetcher::new()),
//!     Arc::new(MemoryStore::new()),
//! );
//! ```

pub mod error;
pub mod fetch;
pub mod history;
pub mod model;
pub mod store;
pub mod sync;
pub mod ttl_cache;
pub mod verify;

// Re-export commonly used types at crate root
pub use model::{
    AuthState, AuthorizationServiceConfig, AuthorizationType, CredentialGrouping, DiscoveredApi,
    KeyPair, Organization, Profile, ProfileHandle, Provider, SavedAuthState, SavedKeyPair,
    SavedProfile, TranslatableString, VersionedList,
};

pub use store::{FileStore, KeyValueStore, MemoryStore, Secret, StoreError};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use verify::{SignatureVerifier, TrustedPublicKey, VerifyError};

pub use ttl_cache::{CacheEntry, TtlCache};

pub use sync::{
    ConfigurationSync, DiscoveryConfig, ListSource, RefreshOutcome, SyncError, SyncEvent,
};

pub use history::{
    CredentialHistoryStore, DISCOVERED_API_CACHE_TTL_SECONDS, HistoryEvent,
};

pub use fetch::{FetchError, Fetcher};

#[cfg(feature = "http-client")]
pub use fetch::HttpFetcher;

pub use error::TunneltrustError;
