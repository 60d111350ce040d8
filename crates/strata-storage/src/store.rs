//! Byte-addressable storage units used as spill targets.

use crate::stream::{FileStoreInputStream, FileStoreOutputStream};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_common::{Result, StrataError};

/// A linear, extendable byte address space.
///
/// Implementations synchronize internally, so a single store can be shared
/// across the batches it backs. After `remove()` every I/O call fails with
/// `StoreRemoved`; `remove()` itself is idempotent.
pub trait FileStore: Send + Sync {
    /// Returns the store name (unique within its storage manager).
    fn name(&self) -> &str;

    /// Returns the current length in bytes.
    fn len(&self) -> Result<u64>;

    /// Extends or truncates the store to `len` bytes. Extension fills with zeros.
    fn set_len(&self, len: u64) -> Result<()>;

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of store.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `data` at `offset`, extending the store if needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Writes `data` at the current end and returns the offset written at.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Releases the store's resources.
    fn remove(&self);

    /// Returns true once `remove()` has been called.
    fn is_removed(&self) -> bool;

    /// Returns true if the store holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fills `buf` from `offset`, failing rather than returning a short read.
    fn read_fully(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(StrataError::not_enough_bytes());
            }
            filled += n;
        }
        Ok(())
    }

    /// Reads exactly `len` bytes at `offset`.
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_fully(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<'s> dyn FileStore + 's {
    /// Opens a reader starting at `offset`, limited to `length` bytes if given.
    pub fn create_input_stream(&self, offset: u64, length: Option<u64>) -> FileStoreInputStream<'_> {
        FileStoreInputStream::new(self, offset, length)
    }

    /// Opens a buffered appending writer with the given buffer capacity.
    pub fn create_output_stream(&self, capacity: usize) -> FileStoreOutputStream<'_> {
        FileStoreOutputStream::new(self, capacity)
    }
}

/// Decrements a manager's open-store count exactly once.
#[derive(Debug, Default)]
pub(crate) struct StoreTicket {
    counter: Option<Arc<AtomicUsize>>,
}

impl StoreTicket {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Some(counter),
        }
    }

    fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for StoreTicket {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// In-memory store
// =============================================================================

struct MemoryState {
    data: Vec<u8>,
    removed: bool,
    ticket: StoreTicket,
}

/// A storage unit held entirely in memory.
pub struct MemoryStore {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_ticket(name, StoreTicket::default())
    }

    pub(crate) fn with_ticket(name: impl Into<String>, ticket: StoreTicket) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                data: Vec::new(),
                removed: false,
                ticket,
            }),
        }
    }

    fn removed_error(&self) -> StrataError {
        StrataError::StoreRemoved {
            name: self.name.clone(),
        }
    }
}

impl FileStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.removed {
            return Err(self.removed_error());
        }
        Ok(state.data.len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(self.removed_error());
        }
        state.data.resize(len as usize, 0);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let state = self.state.lock();
        if state.removed {
            return Err(self.removed_error());
        }
        let offset = offset as usize;
        if offset >= state.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(state.data.len() - offset);
        buf[..n].copy_from_slice(&state.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(self.removed_error());
        }
        let offset = offset as usize;
        let end = offset + data.len();
        if end > state.data.len() {
            state.data.resize(end, 0);
        }
        state.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(self.removed_error());
        }
        let offset = state.data.len() as u64;
        state.data.extend_from_slice(data);
        Ok(offset)
    }

    fn remove(&self) {
        let mut state = self.state.lock();
        if state.removed {
            return;
        }
        state.removed = true;
        state.data = Vec::new();
        state.ticket.release();
        tracing::debug!(store = %self.name, "removed memory store");
    }

    fn is_removed(&self) -> bool {
        self.state.lock().removed
    }
}

// =============================================================================
// Disk-backed store
// =============================================================================

struct DiskState {
    /// Open handle; `None` once removed.
    file: Option<File>,
    /// Logical length in bytes.
    len: u64,
    ticket: StoreTicket,
}

/// A storage unit backed by one spill file.
///
/// The file is deleted on `remove()` and, failing that, when the store is dropped.
pub struct DiskStore {
    name: String,
    path: PathBuf,
    fsync_enabled: bool,
    state: Mutex<DiskState>,
}

impl DiskStore {
    /// Creates (truncating) the spill file at `path`.
    pub fn create(name: impl Into<String>, path: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        Self::create_with_ticket(name, path, fsync_enabled, StoreTicket::default())
    }

    pub(crate) fn create_with_ticket(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        fsync_enabled: bool,
        ticket: StoreTicket,
    ) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let name = name.into();
        tracing::debug!(store = %name, path = %path.display(), "created disk store");

        Ok(Self {
            name,
            path,
            fsync_enabled,
            state: Mutex::new(DiskState {
                file: Some(file),
                len: 0,
                ticket,
            }),
        })
    }

    /// Returns the spill file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn removed_error(&self) -> StrataError {
        StrataError::StoreRemoved {
            name: self.name.clone(),
        }
    }
}

impl FileStore for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.file.is_none() {
            return Err(self.removed_error());
        }
        Ok(state.len)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or_else(|| self.removed_error())?;
        file.set_len(len)?;
        state.len = len;
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let len = state.len;
        let file = state.file.as_mut().ok_or_else(|| self.removed_error())?;
        if offset >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - offset) as usize);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let fsync = self.fsync_enabled;
        let file = state.file.as_mut().ok_or_else(|| self.removed_error())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if fsync {
            file.sync_data()?;
        }
        let end = offset + data.len() as u64;
        if end > state.len {
            state.len = end;
        }
        Ok(())
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut state = self.state.lock();
        let offset = state.len;
        let fsync = self.fsync_enabled;
        let file = state.file.as_mut().ok_or_else(|| self.removed_error())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if fsync {
            file.sync_data()?;
        }
        state.len = offset + data.len() as u64;
        Ok(offset)
    }

    fn remove(&self) {
        let mut state = self.state.lock();
        if state.file.take().is_none() {
            return;
        }
        state.len = 0;
        state.ticket.release();
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(store = %self.name, error = %e, "failed to delete spill file");
        } else {
            tracing::debug!(store = %self.name, "removed disk store");
        }
    }

    fn is_removed(&self) -> bool {
        self.state.lock().file.is_none()
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        self.remove();
    }
}
