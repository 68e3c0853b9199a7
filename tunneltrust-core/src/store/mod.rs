//! Persistence collaborator abstraction.
//!
//! This module provides:
//! - [`Secret`] - a wrapper for sensitive values that prevents accidental
//!   logging and zeroizes on drop
//! - [`KeyValueStore`] - the string-keyed blob store trait every cached
//!   collection is persisted through
//! - [`MemoryStore`] - in-memory implementation for testing
//! - [`FileStore`] - JSON-file-backed implementation
//! - [`KeyringStore`] - OS keyring implementation (with the `keyring-store`
//!   feature)
//!
//! The store is a best-effort cache, never a source of truth: callers must
//! tolerate losing any value stored here.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use file::FileStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing memory is zeroized on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Error type for persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted blob could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over the platform's persistent key-value blob store.
///
/// One fixed logical key per stored collection; values are opaque string
/// blobs (serialized JSON in practice).
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the blob stored under `key`, or `Ok(None)` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, overwriting any existing blob.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_round_trips_through_serde() {
        let secret = Secret::new("private-key-material");
        let serialized = serde_json::to_string(&secret).unwrap();
        let restored: Secret = serde_json::from_str(&serialized).unwrap();
        assert_eq!(restored, secret);
        assert_eq!(restored.expose(), "private-key-material");
    }
}
