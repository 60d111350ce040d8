//! Batch tiering and tuple buffering for strata.
//!
//! This crate provides:
//! - Managed batch contract between buffers/trees and the tiering service
//! - Default tiering pool that spills least valuable batches to storage
//! - CacheKey ordered replacement with a "prefers memory" hint
//! - LOB reference tracking across serialization
//! - Append-only tuple buffer with a blocking-aware pull cursor

mod cache_key;
mod cursor;
mod frame;
mod lob;
mod manager;
mod pool;
mod replacer;
mod tuple_buffer;

pub use cache_key::{AccessClock, CacheKey, PREFERS_MEMORY_ORDERING};
pub use cursor::IndexedTupleSource;
pub use frame::{BatchFrame, FrameState, SpillLocation};
pub use lob::LobManager;
pub use manager::{BatchId, BatchManager, ManagedBatch};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PooledBatch};
pub use replacer::{CacheKeyReplacer, Replacer};
pub use tuple_buffer::TupleBuffer;
