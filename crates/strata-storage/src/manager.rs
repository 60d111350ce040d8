//! Storage managers hand out fresh storage units.

use crate::store::{DiskStore, FileStore, MemoryStore, StoreTicket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use strata_common::{Result, StorageConfig};

/// Source of storage units.
pub trait StorageManager: Send + Sync {
    /// Creates an empty storage unit whose name starts with `name_prefix`.
    fn create_file_store(&self, name_prefix: &str) -> Result<Arc<dyn FileStore>>;

    /// Number of stores created by this manager and not yet removed.
    fn open_store_count(&self) -> usize;
}

/// Creates the manager selected by a storage configuration: spill files when
/// a directory is configured, memory otherwise.
pub fn storage_manager_for(config: &StorageConfig) -> Result<Arc<dyn StorageManager>> {
    config.validate()?;
    match &config.spill_dir {
        Some(dir) => Ok(Arc::new(FileStorageManager::new(dir, config.fsync_enabled)?)),
        None => Ok(Arc::new(MemoryStorageManager::new())),
    }
}

/// Hands out disk stores, one spill file each.
///
/// Files are named `<prefix>_<n>.spill` with `n` unique per manager.
pub struct FileStorageManager {
    /// Directory holding spill files.
    spill_dir: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    next_id: AtomicU64,
    open_stores: Arc<AtomicUsize>,
}

impl FileStorageManager {
    /// Creates a manager, creating the spill directory if needed.
    pub fn new(spill_dir: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let spill_dir = spill_dir.into();
        std::fs::create_dir_all(&spill_dir)?;

        Ok(Self {
            spill_dir,
            fsync_enabled,
            next_id: AtomicU64::new(0),
            open_stores: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the spill directory path.
    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    fn store_name(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", prefix, n)
    }
}

impl StorageManager for FileStorageManager {
    fn create_file_store(&self, name_prefix: &str) -> Result<Arc<dyn FileStore>> {
        let name = self.store_name(name_prefix);
        let path = self.spill_dir.join(format!("{}.spill", name));
        let store = DiskStore::create_with_ticket(
            name,
            path,
            self.fsync_enabled,
            StoreTicket::new(self.open_stores.clone()),
        )?;
        Ok(Arc::new(store))
    }

    fn open_store_count(&self) -> usize {
        self.open_stores.load(Ordering::Acquire)
    }
}

/// Hands out in-memory stores.
#[derive(Default)]
pub struct MemoryStorageManager {
    next_id: AtomicU64,
    open_stores: Arc<AtomicUsize>,
}

impl MemoryStorageManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageManager for MemoryStorageManager {
    fn create_file_store(&self, name_prefix: &str) -> Result<Arc<dyn FileStore>> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let store = MemoryStore::with_ticket(
            format!("{}_{}", name_prefix, n),
            StoreTicket::new(self.open_stores.clone()),
        );
        Ok(Arc::new(store))
    }

    fn open_store_count(&self) -> usize {
        self.open_stores.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_manager_names_and_counts() {
        let dir = tempdir().unwrap();
        let manager = FileStorageManager::new(dir.path().join("spill"), false).unwrap();
        assert!(manager.spill_dir().exists());

        let a = manager.create_file_store("tb").unwrap();
        let b = manager.create_file_store("tb").unwrap();
        assert_eq!(a.name(), "tb_0");
        assert_eq!(b.name(), "tb_1");
        assert_eq!(manager.open_store_count(), 2);
        assert!(manager.spill_dir().join("tb_0.spill").exists());

        a.remove();
        a.remove();
        assert_eq!(manager.open_store_count(), 1);
        assert!(!manager.spill_dir().join("tb_0.spill").exists());

        drop(b);
        assert_eq!(manager.open_store_count(), 0);
    }

    #[test]
    fn test_memory_manager() {
        let manager = MemoryStorageManager::new();
        let store = manager.create_file_store("lob").unwrap();
        assert_eq!(store.name(), "lob_0");
        store.append(b"content").unwrap();
        assert_eq!(store.read(0, 7).unwrap(), b"content");
        assert_eq!(manager.open_store_count(), 1);
        store.remove();
        assert_eq!(manager.open_store_count(), 0);
    }

    #[test]
    fn test_manager_for_config() {
        let memory = storage_manager_for(&StorageConfig::default()).unwrap();
        let store = memory.create_file_store("m").unwrap();
        assert_eq!(store.name(), "m_0");

        let dir = tempdir().unwrap();
        let config = StorageConfig {
            spill_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let disk = storage_manager_for(&config).unwrap();
        let _store = disk.create_file_store("d").unwrap();
        assert!(dir.path().join("d_0.spill").exists());
    }
}
