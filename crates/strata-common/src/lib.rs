//! Strata common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all strata components:
//! - Error taxonomy, including the cooperative blocked signal
//! - Storage, buffer and tree configuration
//! - Column type tags, values, tuples and LOB references
//! - Row-numbered tuple batches

pub mod batch;
pub mod config;
pub mod error;
pub mod tuple;
pub mod types;

pub use batch::TupleBatch;
pub use config::{BufferConfig, StorageConfig, TreeConfig};
pub use error::{ErrorCategory, Result, StrataError};
pub use tuple::{compare_values, LobKind, LobValue, Tuple, Value};
pub use types::TypeId;
