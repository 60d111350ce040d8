//! Spill storage for strata.
//!
//! This crate provides:
//! - Byte-addressable storage units in memory or in spill files
//! - Buffered output and streaming input over a storage unit
//! - Storage managers that name and account for storage units
//! - Auto-cleanup registry for resources whose owners were dropped
//! - Serialized layout of spilled tuple batches

mod cleanup;
mod codec;
mod manager;
mod store;
mod stream;

pub use cleanup::{AutoCleanupRegistry, DEFAULT_SCAN_LIMIT};
pub use codec::{TupleCodec, BATCH_HEADER_SIZE};
pub use manager::{storage_manager_for, FileStorageManager, MemoryStorageManager, StorageManager};
pub use store::{DiskStore, FileStore, MemoryStore};
pub use stream::{FileStoreInputStream, FileStoreOutputStream};
