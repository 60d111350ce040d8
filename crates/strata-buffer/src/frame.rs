//! Batch frame management.

use crate::cache_key::CacheKey;
use crate::manager::BatchId;
use bytes::Bytes;
use strata_common::{Result, StrataError, Tuple, TupleBatch};
use strata_storage::{FileStore, TupleCodec};

/// Where a persisted batch's bytes live.
#[derive(Debug, Clone)]
pub enum SpillLocation {
    /// Byte range of the pool's spill store.
    Store { offset: u64, len: u64 },
    /// Small batches whose output never reached the store.
    Inline(Bytes),
}

/// Storage state of a frame. A batch is resident or persisted, never both.
#[derive(Debug)]
pub enum FrameState {
    Resident(Vec<Tuple>),
    Persisted(SpillLocation),
}

/// Pool-side record of one managed batch.
pub struct BatchFrame {
    id: BatchId,
    begin_row: u64,
    row_count: usize,
    codec: TupleCodec,
    state: FrameState,
    /// Copy already written by an earlier spill. Batches never change, so a
    /// re-admitted frame is evicted again without rewriting it.
    spilled: Option<SpillLocation>,
    key: CacheKey,
}

impl BatchFrame {
    /// Creates a resident frame.
    pub fn new(id: BatchId, batch: TupleBatch, codec: TupleCodec, key: CacheKey) -> Self {
        let begin_row = batch.begin_row();
        let tuples = batch.into_tuples();
        Self {
            id,
            begin_row,
            row_count: tuples.len(),
            codec,
            state: FrameState::Resident(tuples),
            spilled: None,
            key,
        }
    }

    #[inline]
    pub fn id(&self) -> BatchId {
        self.id
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[inline]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn set_key(&mut self, key: CacheKey) {
        self.key = key;
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        matches!(self.state, FrameState::Resident(_))
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    /// Writes the resident tuples through a buffered output stream and drops
    /// them from memory. Returns the number of rows released.
    pub fn spill(&mut self, store: &dyn FileStore, buffer_capacity: usize) -> Result<usize> {
        if !self.is_resident() {
            return Ok(0);
        }
        if let Some(location) = self.spilled.take() {
            self.state = FrameState::Persisted(location);
            return Ok(self.row_count);
        }
        let FrameState::Resident(tuples) = &self.state else {
            return Ok(0);
        };

        let mut out = store.create_output_stream(buffer_capacity);
        self.codec.write_batch(tuples, &mut out)?;
        out.close()?;

        let location = match (out.start_offset(), out.take_buffer()) {
            (Some(offset), _) => SpillLocation::Store {
                offset,
                len: out.bytes_written(),
            },
            (None, Some(bytes)) => SpillLocation::Inline(bytes),
            (None, None) => {
                return Err(StrataError::Internal(format!(
                    "spill of batch {} produced no output",
                    self.id
                )))
            }
        };

        self.state = FrameState::Persisted(location);
        Ok(self.row_count)
    }

    /// Returns the frame's tuples, reading them back if persisted.
    pub fn load(&self, store: Option<&dyn FileStore>) -> Result<Vec<Tuple>> {
        match &self.state {
            FrameState::Resident(tuples) => Ok(tuples.clone()),
            FrameState::Persisted(SpillLocation::Inline(bytes)) => self.codec.decode_batch(bytes),
            FrameState::Persisted(SpillLocation::Store { offset, len }) => {
                let store = store.ok_or_else(|| {
                    StrataError::Internal(format!("batch {} persisted without a spill store", self.id))
                })?;
                let bytes = store.read(*offset, *len as usize)?;
                self.codec.decode_batch(&bytes)
            }
        }
    }

    /// Makes the frame resident with already loaded tuples. The persisted
    /// copy is kept for the next spill.
    pub fn admit(&mut self, tuples: Vec<Tuple>) {
        if let FrameState::Persisted(location) =
            std::mem::replace(&mut self.state, FrameState::Resident(tuples))
        {
            self.spilled = Some(location);
        }
    }

    /// Wraps tuples with this frame's row numbering.
    pub fn to_batch(&self, tuples: Vec<Tuple>) -> TupleBatch {
        TupleBatch::new(self.begin_row, tuples)
    }
}
