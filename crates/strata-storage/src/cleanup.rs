//! Last-resort release of resources whose owners were dropped without an
//! explicit `remove()`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use strata_common::Result;

/// Entries examined per registration.
pub const DEFAULT_SCAN_LIMIT: usize = 16;

type CleanupAction = Box<dyn FnOnce() -> Result<()> + Send>;

struct Registration {
    /// True while the owner is still reachable.
    alive: Box<dyn Fn() -> bool + Send>,
    action: CleanupAction,
}

/// Registry of cleanup actions keyed by weak owner references.
///
/// The registry never holds a strong reference to an owner. Every
/// `register` call also examines up to `scan_limit` earlier registrations
/// and runs the action of each one whose owner is gone, exactly once.
/// Actions run outside the registry lock, so an action may itself register.
pub struct AutoCleanupRegistry {
    entries: Mutex<VecDeque<Registration>>,
    scan_limit: usize,
    reclaimed: AtomicU64,
    failed: AtomicU64,
}

impl Default for AutoCleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoCleanupRegistry {
    /// Creates a registry with the default scan limit.
    pub fn new() -> Self {
        Self::with_scan_limit(DEFAULT_SCAN_LIMIT)
    }

    pub fn with_scan_limit(scan_limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            scan_limit: scan_limit.max(1),
            reclaimed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Associates `action` with `owner`, then drains a bounded batch of
    /// unreachable owners.
    pub fn register<T, F>(&self, owner: &Arc<T>, action: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(owner);
        self.entries.lock().push_back(Registration {
            alive: Box::new(move || weak.strong_count() > 0),
            action: Box::new(action),
        });
        self.drain(self.scan_limit);
    }

    /// Examines up to `limit` registrations and runs the actions of dead
    /// owners. Returns the number of actions run.
    pub fn drain(&self, limit: usize) -> usize {
        let dead = {
            let mut entries = self.entries.lock();
            let mut dead = Vec::new();
            let n = limit.min(entries.len());
            for _ in 0..n {
                let Some(entry) = entries.pop_front() else {
                    break;
                };
                if (entry.alive)() {
                    entries.push_back(entry);
                } else {
                    dead.push(entry.action);
                }
            }
            dead
        };
        let count = dead.len();
        for action in dead {
            self.run(action);
        }
        count
    }

    /// Examines every registration once.
    pub fn drain_all(&self) -> usize {
        let len = self.entries.lock().len();
        self.drain(len)
    }

    /// Number of registrations still tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of cleanup actions run so far.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Number of cleanup actions that failed or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn run(&self, action: CleanupAction) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(Ok(())) => {
                tracing::debug!("reclaimed resource of dropped owner");
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "cleanup action failed");
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("cleanup action panicked");
            }
        }
    }
}
