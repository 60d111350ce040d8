//! Eviction ordering metadata.

use crate::manager::BatchId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ordering value given to batches that prefer to stay in memory.
pub const PREFERS_MEMORY_ORDERING: i64 = 1;

/// Eviction ordering of one managed batch.
///
/// Keys compare by `ordering_value`, then `last_access`, then `id`. The
/// lowest key is the first eviction candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    ordering_value: i64,
    last_access: u64,
    id: BatchId,
}

impl CacheKey {
    pub fn new(id: BatchId, last_access: u64, ordering_value: i64) -> Self {
        Self {
            ordering_value,
            last_access,
            id,
        }
    }

    #[inline]
    pub fn id(&self) -> BatchId {
        self.id
    }

    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    #[inline]
    pub fn ordering_value(&self) -> i64 {
        self.ordering_value
    }

    /// Returns the key after an access at `now`.
    pub fn touched(self, now: u64) -> Self {
        Self {
            last_access: now,
            ..self
        }
    }

    /// Returns the key with the ordering value set for the given hint.
    pub fn with_prefers_memory(self, prefers: bool) -> Self {
        Self {
            ordering_value: if prefers { PREFERS_MEMORY_ORDERING } else { 0 },
            ..self
        }
    }
}

/// Monotonic logical clock for access timestamps.
#[derive(Debug, Default)]
pub struct AccessClock(AtomicU64);

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let old = CacheKey::new(9, 1, 0);
        let recent = CacheKey::new(1, 5, 0);
        let preferred = CacheKey::new(2, 0, PREFERS_MEMORY_ORDERING);

        assert!(old < recent);
        assert!(recent < preferred);

        // same timestamp falls back to id
        assert!(CacheKey::new(1, 3, 0) < CacheKey::new(2, 3, 0));
    }

    #[test]
    fn test_touch_and_hint() {
        let key = CacheKey::new(4, 1, 0);
        let touched = key.touched(10);
        assert_eq!(touched.last_access(), 10);
        assert_eq!(touched.id(), 4);

        let preferred = touched.with_prefers_memory(true);
        assert_eq!(preferred.ordering_value(), PREFERS_MEMORY_ORDERING);
        assert_eq!(preferred.with_prefers_memory(false).ordering_value(), 0);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = AccessClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }
}
