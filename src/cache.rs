//! Explicit client-style query cache.
//!
//! Entries are keyed by query descriptor, versioned, and carry a stale flag.
//! Each key also tracks a fetch generation: a refetch records the generation
//! it started under and its result is discarded if anyone bumped the
//! generation (an optimistic write "cancelling" the fetch) in the meantime.
//! Invalidated keys are appended to a queue the reconciliation loop drains.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{BlogPost, Id, PostPage};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// A list page, keyed by the canonical filter string.
    List(String),
    /// A single record.
    Post(Id),
}

#[derive(Debug, Clone)]
pub enum CachedValue {
    Page(PostPage),
    Post(BlogPost),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub version: u64,
    pub stale: bool,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<QueryKey, CacheEntry>,
    fetch_gen: HashMap<QueryKey, u64>,
    invalidated: VecDeque<QueryKey>,
    version_counter: u64,
}

/// Shared query cache. Passed around by `Arc`, never a global.
#[derive(Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    /// Fresh (non-stale) value, if any.
    pub fn get_fresh(&self, key: &QueryKey) -> Option<CachedValue> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).filter(|e| !e.stale).map(|e| e.value.clone())
    }

    /// Write a value directly (optimistic write or snapshot restore).
    pub fn put(&self, key: QueryKey, value: CachedValue) {
        let mut inner = self.inner.lock().unwrap();
        inner.version_counter += 1;
        let version = inner.version_counter;
        inner.entries.insert(key, CacheEntry { value, version, stale: false });
    }

    /// Restore a previously snapshotted entry verbatim; `None` means the key
    /// was absent at snapshot time and is removed again.
    pub fn restore(&self, key: QueryKey, snapshot: Option<CacheEntry>) {
        let mut inner = self.inner.lock().unwrap();
        match snapshot {
            Some(e) => {
                inner.entries.insert(key, e);
            }
            None => {
                inner.entries.remove(&key);
            }
        }
    }

    pub fn evict(&self, key: &QueryKey) {
        self.inner.lock().unwrap().entries.remove(key);
    }

    /// Bump the fetch generation so any in-flight refetch for this key
    /// discards its write on completion.
    pub fn cancel(&self, key: &QueryKey) {
        let mut inner = self.inner.lock().unwrap();
        *inner.fetch_gen.entry(key.clone()).or_insert(0) += 1;
    }

    /// Record the start of a refetch; pair with [`complete_fetch`].
    ///
    /// [`complete_fetch`]: QueryCache::complete_fetch
    pub fn begin_fetch(&self, key: &QueryKey) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.fetch_gen.get(key).copied().unwrap_or(0)
    }

    /// Store a fetched value unless the fetch was cancelled while in flight.
    /// Returns whether the write was applied.
    pub fn complete_fetch(&self, key: QueryKey, generation: u64, value: CachedValue) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.fetch_gen.get(&key).copied().unwrap_or(0) != generation {
            return false;
        }
        inner.version_counter += 1;
        let version = inner.version_counter;
        inner.entries.insert(key, CacheEntry { value, version, stale: false });
        true
    }

    /// Mark a key stale and queue it for a reconciling refetch. Queued at
    /// most once until drained.
    pub fn invalidate(&self, key: &QueryKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.entries.get_mut(key) {
            e.stale = true;
        }
        if !inner.invalidated.contains(key) {
            inner.invalidated.push_back(key.clone());
        }
    }

    /// Keys awaiting reconciliation, in invalidation order.
    pub fn drain_invalidated(&self) -> Vec<QueryKey> {
        let mut inner = self.inner.lock().unwrap();
        inner.invalidated.drain(..).collect()
    }

    pub fn pending_invalidations(&self) -> Vec<QueryKey> {
        self.inner.lock().unwrap().invalidated.iter().cloned().collect()
    }

    /// Keys of all cached list pages. Mutations touch every cached page, not
    /// just the one the UI happens to display.
    pub fn list_keys(&self) -> Vec<QueryKey> {
        let inner = self.inner.lock().unwrap();
        inner.entries.keys().filter(|k| matches!(k, QueryKey::List(_))).cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
