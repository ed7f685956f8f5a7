//! In-memory cache index with lazy expiry.

use super::{CacheEntry, CacheIndex};
use crate::errors::CacheError;
use crate::utils::now_utc;
use async_trait::async_trait;
use dashmap::DashMap;

/// An in-memory `CacheIndex`.
///
/// Expired entries are removed on lookup; no background garbage pass.
#[derive(Debug, Default)]
pub struct MemoryCacheIndex {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheIndex {
    /// Creates a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheIndex for MemoryCacheIndex {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now_utc()) {
                return Ok(Some(entry.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}
