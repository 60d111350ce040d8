//! Batch replacement policies for the buffer pool.

use crate::cache_key::CacheKey;
use crate::manager::BatchId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Trait for batch replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records the current key of a batch, after an access or a hint change.
    fn record_access(&self, key: CacheKey);

    /// Marks a batch as evictable (resident) or not.
    fn set_evictable(&self, id: BatchId, evictable: bool);

    /// Selects a victim batch for eviction.
    ///
    /// Returns None if no batches are evictable.
    fn evict(&self) -> Option<BatchId>;

    /// Removes a batch from the replacer.
    fn remove(&self, id: BatchId);

    /// Returns the number of evictable batches.
    fn size(&self) -> usize;
}

/// Replacer that evicts the batch with the lowest `CacheKey`.
///
/// Non-preferred batches go before preferred ones, least recently used first.
pub struct CacheKeyReplacer {
    inner: Mutex<CacheKeyReplacerInner>,
}

#[derive(Default)]
struct CacheKeyReplacerInner {
    /// Current key of every tracked batch.
    keys: HashMap<BatchId, CacheKey>,
    /// Keys of evictable batches, in eviction order.
    evictable: BTreeSet<CacheKey>,
}

impl Default for CacheKeyReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheKeyReplacer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheKeyReplacerInner::default()),
        }
    }

    /// Returns the number of tracked batches.
    pub fn tracked(&self) -> usize {
        self.inner.lock().keys.len()
    }
}

impl Replacer for CacheKeyReplacer {
    fn record_access(&self, key: CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.keys.insert(key.id(), key) {
            if inner.evictable.remove(&old) {
                inner.evictable.insert(key);
            }
        }
    }

    fn set_evictable(&self, id: BatchId, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(&key) = inner.keys.get(&id) else {
            return;
        };
        if evictable {
            inner.evictable.insert(key);
        } else {
            inner.evictable.remove(&key);
        }
    }

    fn evict(&self) -> Option<BatchId> {
        let mut inner = self.inner.lock();
        let victim = inner.evictable.pop_first()?;
        Some(victim.id())
    }

    fn remove(&self, id: BatchId) {
        let mut inner = self.inner.lock();
        if let Some(key) = inner.keys.remove(&id) {
            inner.evictable.remove(&key);
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable.len()
    }
}
