//! Configuration structures for strata.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of rows per flushed tuple-buffer batch.
pub const DEFAULT_PROCESSOR_BATCH_SIZE: usize = 256;

/// Default number of tuples per tree page.
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Default tuple count at which a tree page hands its payload to a managed batch.
pub const DEFAULT_LEAF_BATCH_THRESHOLD: usize = 16;

/// Smallest usable tree page size. Merging uses `page_size / 4` as the
/// sparseness limit, so anything smaller degenerates.
pub const MIN_PAGE_SIZE: usize = 4;

/// Spill storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for spill files. `None` keeps every storage unit in memory.
    pub spill_dir: Option<PathBuf>,
    /// Enable fsync after buffered output flushes.
    pub fsync_enabled: bool,
    /// Capacity in bytes of buffered output streams.
    pub output_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            spill_dir: None,
            fsync_enabled: false,
            output_buffer_size: 8 * 1024, // 8 KB
        }
    }
}

impl StorageConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.output_buffer_size == 0 {
            return Err(StrataError::ConfigError(
                "output_buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuple buffering and tiering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Rows per batch flushed from a tuple buffer's tail.
    pub processor_batch_size: usize,
    /// Rows the default pool keeps resident before spilling.
    pub max_resident_rows: usize,
    /// LOB content larger than this (bytes) is copied into a storage unit.
    pub lob_inline_limit: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            processor_batch_size: DEFAULT_PROCESSOR_BATCH_SIZE,
            max_resident_rows: 1 << 20,
            lob_inline_limit: 8 * 1024,
        }
    }
}

impl BufferConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.processor_batch_size == 0 {
            return Err(StrataError::ConfigError(
                "processor_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Search tree configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Maximum entries per page.
    pub page_size: usize,
    /// Entry count at which a page payload is moved into a managed batch.
    pub leaf_batch_threshold: usize,
    /// Seed for the level generator.
    pub seed: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            leaf_batch_threshold: DEFAULT_LEAF_BATCH_THRESHOLD,
            seed: 0x9E37_79B9_7F4A_7C15,
        }
    }
}

impl TreeConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(StrataError::ConfigError(format!(
                "page_size must be at least {}, got {}",
                MIN_PAGE_SIZE, self.page_size
            )));
        }
        if self.leaf_batch_threshold == 0 {
            return Err(StrataError::ConfigError(
                "leaf_batch_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
