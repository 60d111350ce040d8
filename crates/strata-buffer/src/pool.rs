//! Default batch tiering pool.

use crate::cache_key::{AccessClock, CacheKey};
use crate::frame::BatchFrame;
use crate::manager::{BatchId, BatchManager, ManagedBatch};
use crate::replacer::{CacheKeyReplacer, Replacer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_common::{BufferConfig, Result, StorageConfig, StrataError, TupleBatch, TypeId};
use strata_storage::{
    storage_manager_for, AutoCleanupRegistry, FileStore, MemoryStorageManager, StorageManager,
    TupleCodec,
};
use sysinfo::System;

/// Rough in-memory footprint of one tuple, used when sizing from system memory.
const ESTIMATED_ROW_BYTES: usize = 256;

/// Default buffered output capacity for spills.
const DEFAULT_SPILL_BUFFER_SIZE: usize = 8 * 1024;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Rows kept resident before batches are spilled.
    pub max_resident_rows: usize,
    /// Capacity of the buffered output stream used for spills.
    pub spill_buffer_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_resident_rows: BufferConfig::default().max_resident_rows,
            spill_buffer_size: DEFAULT_SPILL_BUFFER_SIZE,
        }
    }
}

/// Batch tiering pool.
///
/// Keeps batches resident until `max_resident_rows` is exceeded, then spills
/// the batch with the lowest `CacheKey` into one shared spill store at
/// increasing offsets:
/// - Non-preferred, least recently used batches go first
/// - Reloads with `prefer_cache` make a batch resident again
/// - A re-admitted batch keeps its spilled copy, so evicting it again writes nothing
/// - Handles dropped without `remove()` are reclaimed through the cleanup registry
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    /// Configuration.
    config: BufferPoolConfig,
    /// Source of the spill store and of stores handed to callers.
    storage: Arc<dyn StorageManager>,
    /// Frames and residency accounting.
    state: Mutex<PoolState>,
    /// Batch replacement policy.
    replacer: CacheKeyReplacer,
    /// Safety net for dropped handles.
    cleanup: AutoCleanupRegistry,
    clock: AccessClock,
    next_id: AtomicU64,
    spills: AtomicU64,
    reloads: AtomicU64,
}

struct PoolState {
    frames: HashMap<BatchId, BatchFrame>,
    resident_rows: usize,
    /// Created on first spill, removed once no frames remain.
    spill_store: Option<Arc<dyn FileStore>>,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig, storage: Arc<dyn StorageManager>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                storage,
                state: Mutex::new(PoolState {
                    frames: HashMap::new(),
                    resident_rows: 0,
                    spill_store: None,
                }),
                replacer: CacheKeyReplacer::new(),
                cleanup: AutoCleanupRegistry::new(),
                clock: AccessClock::new(),
                next_id: AtomicU64::new(1),
                spills: AtomicU64::new(0),
                reloads: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a pool that spills into memory stores.
    pub fn in_memory(max_resident_rows: usize) -> Self {
        Self::new(
            BufferPoolConfig {
                max_resident_rows,
                ..Default::default()
            },
            Arc::new(MemoryStorageManager::new()),
        )
    }

    /// Creates a pool from buffer and storage configuration.
    pub fn from_config(buffer: &BufferConfig, storage: &StorageConfig) -> Result<Self> {
        buffer.validate()?;
        let manager = storage_manager_for(storage)?;
        Ok(Self::new(
            BufferPoolConfig {
                max_resident_rows: buffer.max_resident_rows,
                spill_buffer_size: storage.output_buffer_size,
            },
            manager,
        ))
    }

    /// Creates a pool whose resident limit is sized to 25% of available
    /// system RAM, at an estimated 256 bytes per row. Minimum 10,000 rows.
    pub fn auto_sized(storage: Arc<dyn StorageManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let max_resident_rows = (target_bytes / ESTIMATED_ROW_BYTES).max(10_000);

        Self::new(
            BufferPoolConfig {
                max_resident_rows,
                ..Default::default()
            },
            storage,
        )
    }

    /// Returns the resident row limit.
    pub fn max_resident_rows(&self) -> usize {
        self.shared.config.max_resident_rows
    }

    /// Runs cleanup for every handle dropped without `remove()`.
    /// Returns the number of batches reclaimed.
    pub fn reclaim(&self) -> usize {
        self.shared.cleanup.drain_all()
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.shared.state.lock();
        let resident_batches = state.frames.values().filter(|f| f.is_resident()).count();
        let spill_bytes = state
            .spill_store
            .as_ref()
            .and_then(|store| store.len().ok())
            .unwrap_or(0);
        BufferPoolStats {
            total_batches: state.frames.len(),
            resident_batches,
            persisted_batches: state.frames.len() - resident_batches,
            resident_rows: state.resident_rows,
            spills: self.shared.spills.load(Ordering::Relaxed),
            reloads: self.shared.reloads.load(Ordering::Relaxed),
            spill_bytes,
        }
    }
}

impl BatchManager for BufferPool {
    fn create_managed_batch(&self, batch: TupleBatch, types: &[TypeId]) -> Result<Arc<dyn ManagedBatch>> {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let row_count = batch.row_count();
        let key = CacheKey::new(id, shared.clock.tick(), 0);
        let frame = BatchFrame::new(id, batch, TupleCodec::new(types.to_vec()), key);

        {
            let mut state = shared.state.lock();
            state.frames.insert(id, frame);
            state.resident_rows += row_count;
            shared.replacer.record_access(key);
            shared.replacer.set_evictable(id, true);
            if let Err(e) = shared.enforce_limit(&mut state) {
                // no handle exists yet, so nothing else can release the frame
                shared.drop_frame(&mut state, id);
                return Err(e);
            }
        }

        let handle = Arc::new(PooledBatch {
            id,
            row_count,
            pool: shared.clone(),
            removed: AtomicBool::new(false),
        });

        let weak_pool = Arc::downgrade(shared);
        shared.cleanup.register(&handle, move || {
            if let Some(pool) = weak_pool.upgrade() {
                if pool.release(id) {
                    tracing::debug!(batch = id, "reclaimed batch of dropped handle");
                }
            }
            Ok(())
        });

        Ok(handle)
    }

    fn create_file_store(&self, name_prefix: &str) -> Result<Arc<dyn FileStore>> {
        self.shared.storage.create_file_store(name_prefix)
    }
}

impl PoolShared {
    /// Spills lowest-key batches until the resident limit holds.
    /// A victim whose spill fails stays resident and evictable.
    fn enforce_limit(&self, state: &mut PoolState) -> Result<()> {
        while state.resident_rows > self.config.max_resident_rows {
            let Some(victim) = self.replacer.evict() else {
                break;
            };
            let released = match self.spill_frame(state, victim) {
                Ok(Some(released)) => released,
                Ok(None) => continue,
                Err(e) => {
                    self.replacer.set_evictable(victim, true);
                    tracing::warn!(batch = victim, error = %e, "batch spill failed");
                    return Err(e);
                }
            };
            state.resident_rows -= released;
            self.spills.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(batch = victim, rows = released, "spilled batch");
        }
        Ok(())
    }

    /// Spills one frame. Returns None if the frame is gone.
    fn spill_frame(&self, state: &mut PoolState, id: BatchId) -> Result<Option<usize>> {
        if !state.frames.contains_key(&id) {
            return Ok(None);
        }
        let store = match &state.spill_store {
            Some(store) => store.clone(),
            None => {
                let store = self.storage.create_file_store("pool")?;
                state.spill_store = Some(store.clone());
                store
            }
        };
        match state.frames.get_mut(&id) {
            Some(frame) => Ok(Some(frame.spill(store.as_ref(), self.config.spill_buffer_size)?)),
            None => Ok(None),
        }
    }

    fn get_batch(&self, id: BatchId, prefer_cache: bool) -> Result<TupleBatch> {
        let mut state = self.state.lock();
        let spill_store = state.spill_store.clone();
        let frame = state
            .frames
            .get_mut(&id)
            .ok_or(StrataError::BatchRemoved(id))?;

        let key = frame.key().touched(self.clock.tick());
        frame.set_key(key);
        self.replacer.record_access(key);

        let tuples = frame.load(spill_store.as_deref())?;
        if frame.is_resident() {
            return Ok(frame.to_batch(tuples));
        }

        self.reloads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(batch = id, prefer_cache, "reloaded batch");
        let batch = frame.to_batch(tuples.clone());
        if prefer_cache {
            let rows = frame.row_count();
            frame.admit(tuples);
            state.resident_rows += rows;
            self.replacer.set_evictable(id, true);
            self.enforce_limit(&mut state)?;
        }
        Ok(batch)
    }

    fn set_prefers_memory(&self, id: BatchId, prefers: bool) {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.get_mut(&id) {
            let key = frame.key().with_prefers_memory(prefers);
            frame.set_key(key);
            self.replacer.record_access(key);
        }
    }

    /// Drops a frame. Returns false if it was already gone.
    fn release(&self, id: BatchId) -> bool {
        let mut state = self.state.lock();
        self.drop_frame(&mut state, id)
    }

    fn drop_frame(&self, state: &mut PoolState, id: BatchId) -> bool {
        let Some(frame) = state.frames.remove(&id) else {
            return false;
        };
        if frame.is_resident() {
            state.resident_rows -= frame.row_count();
        }
        self.replacer.remove(id);

        if state.frames.is_empty() {
            if let Some(store) = state.spill_store.take() {
                store.remove();
            }
        }
        true
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Number of live batches.
    pub total_batches: usize,
    /// Number of batches held in memory.
    pub resident_batches: usize,
    /// Number of batches held in the spill store.
    pub persisted_batches: usize,
    /// Rows held in memory.
    pub resident_rows: usize,
    /// Spills since creation.
    pub spills: u64,
    /// Reloads of persisted batches since creation.
    pub reloads: u64,
    /// Current length of the spill store.
    pub spill_bytes: u64,
}

/// Handle to one batch held by a `BufferPool`.
pub struct PooledBatch {
    id: BatchId,
    row_count: usize,
    pool: Arc<PoolShared>,
    removed: AtomicBool,
}

impl ManagedBatch for PooledBatch {
    fn id(&self) -> BatchId {
        self.id
    }

    fn row_count(&self) -> usize {
        self.row_count
    }

    fn get_batch(&self, prefer_cache: bool) -> Result<TupleBatch> {
        if self.removed.load(Ordering::Acquire) {
            return Err(StrataError::BatchRemoved(self.id));
        }
        self.pool.get_batch(self.id, prefer_cache)
    }

    fn set_prefers_memory(&self, prefers: bool) {
        if !self.removed.load(Ordering::Acquire) {
            self.pool.set_prefers_memory(self.id, prefers);
        }
    }

    fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.release(self.id);
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}
