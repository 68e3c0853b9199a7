//! A cache which can purge its contents after a fixed time-to-live.
//!
//! Reading a value does NOT reset its TTL: eviction is measured strictly
//! from insertion time. Entries are kept in insertion order so a serialized
//! snapshot restores positionally identical.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single cache slot: the insertion timestamp and the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub inserted_at: DateTime<Utc>,
    pub value: V,
}

/// String-keyed cache with age-based bulk eviction.
///
/// All operations are serialized by one internal mutex, so a shared
/// `TtlCache` is safe under arbitrary concurrent access.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl_seconds: u64,
    entries: Mutex<Vec<(String, CacheEntry<V>)>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache. Entries become eligible for [`purge`](Self::purge)
    /// once `ttl_seconds` have elapsed since insertion; a TTL of zero purges
    /// everything unconditionally.
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Restore a cache from a previously captured snapshot, preserving the
    /// original insertion timestamps and order.
    pub fn from_entries(entries: Vec<(String, CacheEntry<V>)>, ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            entries: Mutex::new(entries),
        }
    }

    /// Insert or overwrite a value, stamping the current time. Overwriting
    /// keeps the entry's position in the enumeration order.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = CacheEntry {
            inserted_at: Utc::now(),
            value,
        };
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = entry,
            None => entries.push((key, entry)),
        }
    }

    /// Look up a value. Does not refresh the entry's insertion time.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, entry)| entry.value.clone())
    }

    /// Remove the value stored for `key`, if any.
    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        entries.retain(|(existing, _)| existing != key);
    }

    /// Remove every entry whose age reached the configured TTL.
    pub fn purge(&self) {
        let now = Utc::now();
        let ttl = self.ttl_seconds as i64;
        let mut entries = self.entries.lock();
        entries.retain(|(_, entry)| (now - entry.inserted_at).num_seconds() < ttl);
    }

    /// A read-only snapshot of the entries in insertion order. Mutating the
    /// snapshot affects only the caller's copy, never the cache.
    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        self.entries.lock().clone()
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
