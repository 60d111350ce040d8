//! Pull cursor over a tuple buffer.

use crate::tuple_buffer::TupleBuffer;
use std::sync::Arc;
use std::task::Poll;
use strata_common::{Result, StrataError, Tuple, TupleBatch};

/// Forward cursor with mark/reset over a `TupleBuffer`.
///
/// Reading past the last row of a buffer that is not final fails with
/// `StrataError::Blocked`; the caller retries later. Once the buffer is
/// final the same read reports end of data.
pub struct IndexedTupleSource {
    buffer: Arc<TupleBuffer>,
    /// Next row to return, 1-based.
    position: u64,
    mark: u64,
    /// Most recently fetched batch.
    current: Option<TupleBatch>,
    single_use: bool,
    closed: bool,
}

impl IndexedTupleSource {
    pub(crate) fn new(buffer: Arc<TupleBuffer>, single_use: bool) -> Self {
        Self {
            buffer,
            position: 1,
            mark: 1,
            current: None,
            single_use,
            closed: false,
        }
    }

    /// Returns true if a row is available at the current position.
    ///
    /// Fails with `Blocked` if the row is not produced yet.
    pub fn has_next(&mut self) -> Result<bool> {
        let row = self.position;
        if self.current.as_ref().is_some_and(|b| b.contains_row(row)) {
            return Ok(true);
        }
        let batch = self.buffer.get_batch(row)?;
        if batch.contains_row(row) {
            self.current = Some(batch);
            return Ok(true);
        }
        if batch.termination_flag() {
            return Ok(false);
        }
        Err(StrataError::Blocked)
    }

    /// Returns the next row, or `None` at end of data.
    pub fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let tuple = self
            .current
            .as_ref()
            .and_then(|b| b.tuple(self.position))
            .cloned();
        self.position += 1;
        Ok(tuple)
    }

    /// Like `next_tuple`, with the blocked signal rendered as `Pending`.
    pub fn poll_next(&mut self) -> Result<Poll<Option<Tuple>>> {
        match self.next_tuple() {
            Ok(tuple) => Ok(Poll::Ready(tuple)),
            Err(e) if e.is_blocked() => Ok(Poll::Pending),
            Err(e) => Err(e),
        }
    }

    /// Row number the next call reads.
    pub fn current_index(&self) -> u64 {
        self.position
    }

    /// Remembers the current position for `reset`.
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    /// Returns to the last mark (row 1 if never marked).
    pub fn reset(&mut self) {
        self.position = self.mark;
    }

    /// Moves to an absolute row.
    pub fn set_position(&mut self, row: u64) {
        self.position = row;
    }

    pub fn buffer(&self) -> &Arc<TupleBuffer> {
        &self.buffer
    }

    /// Closes the cursor. A single-use cursor removes its buffer.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = None;
        if self.single_use {
            self.buffer.remove();
        }
    }
}

impl Drop for IndexedTupleSource {
    fn drop(&mut self) {
        self.close();
    }
}
