//! Managed batch contract.
//!
//! A managed batch owns one batch worth of rows and is either resident in
//! memory or persisted to a storage unit, never both. Tuple buffers and tree
//! pages only talk to this contract; which batches stay resident is decided
//! by the `BatchManager` implementation.

use std::sync::Arc;
use strata_common::{Result, TupleBatch, TypeId};
use strata_storage::FileStore;

/// Opaque identifier of a managed batch.
pub type BatchId = u64;

/// Lifecycle handle over one batch's storage.
pub trait ManagedBatch: Send + Sync {
    /// Returns the batch id.
    fn id(&self) -> BatchId;

    /// Returns the number of rows held.
    fn row_count(&self) -> usize;

    /// Materializes the batch. With `prefer_cache` a persisted batch is made
    /// resident again after loading.
    fn get_batch(&self, prefer_cache: bool) -> Result<TupleBatch>;

    /// Eviction hint. Never changes what `get_batch` returns.
    fn set_prefers_memory(&self, prefers: bool);

    /// Releases the batch's storage. Idempotent; later reads fail with
    /// `BatchRemoved`.
    fn remove(&self);

    /// Returns true once `remove()` has been called.
    fn is_removed(&self) -> bool;
}

/// Storage-tiering service consumed by tuple buffers and trees.
pub trait BatchManager: Send + Sync {
    /// Takes ownership of `batch` and returns its handle.
    fn create_managed_batch(&self, batch: TupleBatch, types: &[TypeId]) -> Result<Arc<dyn ManagedBatch>>;

    /// Creates a fresh storage unit named after `name_prefix`.
    fn create_file_store(&self, name_prefix: &str) -> Result<Arc<dyn FileStore>>;
}
