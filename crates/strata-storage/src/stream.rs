//! Streaming readers and buffered writers over a `FileStore`.

use crate::store::FileStore;
use bytes::Bytes;
use std::io;
use strata_common::{Result, StrataError};

fn to_io_error(err: StrataError) -> io::Error {
    match err {
        StrataError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Sequential reader over a byte range of a store.
pub struct FileStoreInputStream<'a> {
    store: &'a dyn FileStore,
    position: u64,
    /// Exclusive end offset, or `None` to read to the end of the store.
    end: Option<u64>,
}

impl<'a> FileStoreInputStream<'a> {
    /// Creates a reader starting at `offset`, limited to `length` bytes if given.
    pub fn new(store: &'a dyn FileStore, offset: u64, length: Option<u64>) -> Self {
        Self {
            store,
            position: offset,
            end: length.map(|len| offset + len),
        }
    }

    /// Returns the current read offset.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl io::Read for FileStoreInputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = match self.end {
            Some(end) => buf.len().min(end.saturating_sub(self.position) as usize),
            None => buf.len(),
        };
        if want == 0 {
            return Ok(0);
        }
        let n = self
            .store
            .read_at(self.position, &mut buf[..want])
            .map_err(to_io_error)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Buffered appending writer over a store.
///
/// Writes accumulate in a fixed-capacity buffer and reach the store only when
/// the buffer fills or on an explicit `flush`. If the stream is closed before
/// anything reached the store, the bytes stay in the trimmed buffer and the
/// store is never touched.
pub struct FileStoreOutputStream<'a> {
    store: &'a dyn FileStore,
    buffer: Vec<u8>,
    capacity: usize,
    /// Store offset of the first flushed byte.
    start_offset: Option<u64>,
    bytes_written: u64,
    closed: bool,
}

impl<'a> FileStoreOutputStream<'a> {
    /// Creates a writer with the given buffer capacity.
    pub fn new(store: &'a dyn FileStore, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            buffer: Vec::with_capacity(capacity),
            capacity,
            start_offset: None,
            bytes_written: 0,
            closed: false,
        }
    }

    /// Appends bytes, flushing to the store whenever the buffer fills.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StrataError::IoError("output stream is closed".to_string()));
        }
        self.bytes_written += data.len() as u64;
        while !data.is_empty() {
            let room = self.capacity - self.buffer.len();
            let n = room.min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.buffer.len() == self.capacity {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Pushes buffered bytes to the store.
    pub fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let offset = self.store.append(&self.buffer)?;
        if self.start_offset.is_none() {
            self.start_offset = Some(offset);
        }
        self.buffer.clear();
        Ok(())
    }

    /// Closes the stream. Remaining bytes are flushed only if the store was
    /// already written to; otherwise they are kept in memory.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.start_offset.is_some() {
            self.flush_buffer()?;
        } else {
            self.buffer.shrink_to_fit();
        }
        self.closed = true;
        Ok(())
    }

    /// Total bytes accepted by the stream.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns true if any bytes reached the store.
    pub fn is_flushed(&self) -> bool {
        self.start_offset.is_some()
    }

    /// Store offset where this stream's bytes begin, once flushed.
    pub fn start_offset(&self) -> Option<u64> {
        self.start_offset
    }

    /// The retained in-memory bytes of a closed, never-flushed stream.
    pub fn buffer(&self) -> Option<&[u8]> {
        if self.closed && self.start_offset.is_none() {
            Some(&self.buffer)
        } else {
            None
        }
    }

    /// Takes the retained in-memory bytes, see `buffer()`.
    pub fn take_buffer(&mut self) -> Option<Bytes> {
        if self.closed && self.start_offset.is_none() {
            Some(Bytes::from(std::mem::take(&mut self.buffer)))
        } else {
            None
        }
    }
}

impl io::Write for FileStoreOutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer().map_err(to_io_error)
    }
}
