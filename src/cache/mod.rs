//! Deterministic-result caching.
//!
//! When an operation is marked deterministic in its manifest, the
//! dispatcher derives a stable key from the operation identity and the
//! content checksums of its inputs; a live cache entry lets the step be
//! satisfied without dispatching. Entries outlive the jobs that created
//! them; liveness of the referenced outputs is assumed for the TTL.

mod key;
mod memory;

pub use key::cache_key;
pub use memory::MemoryCacheIndex;

use crate::errors::CacheError;
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cached result: output bindings plus expiry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Output placeholder -> produced reference.
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// When the result was produced.
    pub produced_at: Timestamp,
    /// Seconds the entry stays valid.
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Creates an entry produced now.
    #[must_use]
    pub fn new(outputs: BTreeMap<String, serde_json::Value>, ttl_secs: u64) -> Self {
        Self {
            outputs,
            produced_at: now_utc(),
            ttl_secs,
        }
    }

    /// Returns true if the entry has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        let age = now.signed_duration_since(self.produced_at);
        age.num_seconds() >= 0 && age.num_seconds() as u64 > self.ttl_secs
    }
}

/// Maps deterministic cache keys to prior output references.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Looks up a key; expired entries are misses and are lazily removed.
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores (or replaces) an entry under a key.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_entry_not_expired_within_ttl() {
        let entry = CacheEntry::new(BTreeMap::new(), 3600);
        assert!(!entry.is_expired(now_utc()));
    }

    #[test]
    fn test_entry_expired_after_ttl() {
        let entry = CacheEntry::new(BTreeMap::new(), 60);
        let later = now_utc() + Duration::seconds(61);
        assert!(entry.is_expired(later));
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = CacheEntry::new(
            BTreeMap::from([("out".to_string(), serde_json::json!("s3://x/out.wav"))]),
            300,
        );
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
