//! Append-only tuple log backed by managed batches.

use crate::cursor::IndexedTupleSource;
use crate::lob::LobManager;
use crate::manager::{BatchManager, ManagedBatch};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_common::{BufferConfig, LobValue, Result, StrataError, Tuple, TupleBatch, TypeId};

/// Growable, row-numbered tuple sequence.
///
/// Rows `1..=row_count` are held by flushed managed batches (keyed by their
/// first row) followed by the in-memory tail. Appends go to the tail, which
/// is flushed into a new managed batch every `batch_size` rows.
///
/// Callers must serialize appends; reads of a final buffer may run
/// concurrently.
pub struct TupleBuffer {
    id: String,
    types: Vec<TypeId>,
    batch_size: usize,
    manager: Arc<dyn BatchManager>,
    lobs: Option<LobManager>,
    state: Mutex<BufferState>,
}

struct BufferState {
    row_count: u64,
    is_final: bool,
    /// Unflushed rows `row_count - tail.len() + 1 ..= row_count`.
    tail: Vec<Tuple>,
    /// Flushed batches keyed by first row.
    batches: BTreeMap<u64, Arc<dyn ManagedBatch>>,
    forward_only: bool,
    prefers_memory: bool,
    removed: bool,
}

impl BufferState {
    #[inline]
    fn tail_start(&self) -> u64 {
        self.row_count - self.tail.len() as u64 + 1
    }
}

impl TupleBuffer {
    /// Creates an empty buffer. Schemas with LOB columns get a LOB tracker
    /// backed by a store from `manager`.
    pub fn new(
        id: impl Into<String>,
        types: Vec<TypeId>,
        manager: Arc<dyn BatchManager>,
        config: &BufferConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = id.into();
        let lobs = match LobManager::for_types(&types) {
            Some(lobs) => {
                let store = manager.create_file_store(&format!("{}_lobs", id))?;
                Some(lobs.with_store(store, config.lob_inline_limit))
            }
            None => None,
        };

        Ok(Self {
            id,
            types,
            batch_size: config.processor_batch_size,
            manager,
            lobs,
            state: Mutex::new(BufferState {
                row_count: 0,
                is_final: false,
                tail: Vec::new(),
                batches: BTreeMap::new(),
                forward_only: false,
                prefers_memory: false,
                removed: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn row_count(&self) -> u64 {
        self.state.lock().row_count
    }

    pub fn is_final(&self) -> bool {
        self.state.lock().is_final
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Number of flushed batches currently held.
    pub fn managed_batch_count(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// Appends one row.
    pub fn append(&self, mut tuple: Tuple) -> Result<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if let Some(lobs) = &self.lobs {
            lobs.update_references(&mut tuple)?;
        }
        state.row_count += 1;
        state.tail.push(tuple);
        if state.tail.len() >= self.batch_size {
            self.save_batch(&mut state)?;
        }
        Ok(())
    }

    /// Publishes an upstream batch. With `persist` its rows are appended;
    /// otherwise only its LOB references are recorded and the row count is
    /// advanced to the batch's end row, which may not lie behind it.
    pub fn add_batch(&self, batch: &TupleBatch, persist: bool) -> Result<()> {
        if persist {
            let row_count = self.row_count();
            if batch.begin_row() > row_count + 1 {
                return Err(StrataError::InvalidArgument(format!(
                    "batch starting at row {} leaves a gap after row {}",
                    batch.begin_row(),
                    row_count
                )));
            }
            for tuple in batch.tuples().iter().skip((row_count + 1 - batch.begin_row()) as usize) {
                self.append(tuple.clone())?;
            }
            return Ok(());
        }

        let row_count = self.row_count();
        if batch.end_row() < row_count {
            return Err(StrataError::InvalidArgument(format!(
                "batch ending at row {} is behind row count {}",
                batch.end_row(),
                row_count
            )));
        }
        if let Some(lobs) = &self.lobs {
            for tuple in batch.tuples() {
                lobs.update_references(&mut tuple.clone())?;
            }
        }
        self.set_row_count(batch.end_row())
    }

    /// Moves the row count. Growing flushes the tail first; shrinking truncates.
    pub fn set_row_count(&self, rows: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if rows > state.row_count {
            self.save_batch(&mut state)?;
            state.row_count = rows;
        } else if rows < state.row_count {
            self.truncate_locked(&mut state, rows)?;
        }
        Ok(())
    }

    /// Drops every row after `rows`.
    pub fn truncate_to(&self, rows: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.check_writable(&state)?;
        if rows < state.row_count {
            self.truncate_locked(&mut state, rows)?;
        }
        Ok(())
    }

    /// Drops all rows, leaving an empty, writable buffer.
    pub fn purge(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.check_live(&state)?;
        for batch in std::mem::take(&mut state.batches).into_values() {
            batch.remove();
        }
        state.tail.clear();
        state.row_count = 0;
        state.is_final = false;
        if let Some(lobs) = &self.lobs {
            lobs.clear();
        }
        tracing::debug!(buffer = %self.id, "purged tuple buffer");
        Ok(())
    }

    /// Returns the batch holding `row`, or an empty batch at `row_count + 1`
    /// when `row` is past the end.
    pub fn get_batch(&self, row: u64) -> Result<TupleBatch> {
        let mut state = self.state.lock();
        self.check_live(&state)?;

        if row > state.row_count {
            return Ok(TupleBatch::empty(state.row_count + 1).with_termination(state.is_final));
        }

        let batch = if !state.tail.is_empty() && row >= state.tail_start() {
            let begin = state.tail_start();
            let tuples = if state.forward_only {
                std::mem::take(&mut state.tail)
            } else {
                state.tail.clone()
            };
            TupleBatch::new(begin, tuples)
        } else {
            let (&start, handle) = state.batches.range(..=row).next_back().ok_or_else(|| {
                StrataError::RowUnavailable {
                    row,
                    buffer: self.id.clone(),
                }
            })?;
            let batch = handle.get_batch(!state.forward_only)?;
            if !batch.contains_row(row) {
                return Err(StrataError::RowUnavailable {
                    row,
                    buffer: self.id.clone(),
                });
            }
            if state.forward_only {
                if let Some(handle) = state.batches.remove(&start) {
                    handle.remove();
                }
            }
            batch
        };

        let batch = match &self.lobs {
            Some(lobs) => {
                let begin = batch.begin_row();
                let mut tuples = batch.into_tuples();
                for tuple in &mut tuples {
                    lobs.update_references(tuple)?;
                }
                TupleBatch::new(begin, tuples)
            }
            None => batch,
        };

        let last = state.is_final && batch.end_row() == state.row_count;
        Ok(batch.with_termination(last))
    }

    /// Flushes the tail and marks the buffer final. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.check_live(&state)?;
        if state.is_final {
            return Ok(());
        }
        self.save_batch(&mut state)?;
        state.is_final = true;
        tracing::debug!(buffer = %self.id, rows = state.row_count, "closed tuple buffer");
        Ok(())
    }

    /// Sets or clears the final flag. Setting it flushes like `close`;
    /// clearing it lets the producer append again.
    pub fn set_final(&self, is_final: bool) -> Result<()> {
        if is_final {
            return self.close();
        }
        let mut state = self.state.lock();
        self.check_live(&state)?;
        state.is_final = false;
        Ok(())
    }

    /// Releases every batch, the LOB tracker and the tail. Idempotent; any
    /// later use fails with `BufferRemoved`.
    pub fn remove(&self) {
        let mut state = self.state.lock();
        if state.removed {
            return;
        }
        state.removed = true;
        for batch in std::mem::take(&mut state.batches).into_values() {
            batch.remove();
        }
        state.tail = Vec::new();
        if let Some(lobs) = &self.lobs {
            lobs.remove();
        }
        tracing::debug!(buffer = %self.id, "removed tuple buffer");
    }

    /// In forward-only mode each batch is released once it has been read.
    pub fn set_forward_only(&self, forward_only: bool) {
        self.state.lock().forward_only = forward_only;
    }

    /// Eviction hint passed to every batch of this buffer.
    pub fn set_prefers_memory(&self, prefers: bool) {
        let mut state = self.state.lock();
        state.prefers_memory = prefers;
        for batch in state.batches.values() {
            batch.set_prefers_memory(prefers);
        }
    }

    /// Resolves a LOB reference id seen by this buffer.
    pub fn lob_reference(&self, id: &str) -> Result<LobValue> {
        match &self.lobs {
            Some(lobs) => lobs.resolve(id),
            None => Err(StrataError::LobNotFound(id.to_string())),
        }
    }

    /// Creates a cursor over this buffer. A single-use cursor removes the
    /// buffer when closed.
    pub fn create_indexed_tuple_source(self: &Arc<Self>, single_use: bool) -> IndexedTupleSource {
        IndexedTupleSource::new(self.clone(), single_use)
    }

    fn check_live(&self, state: &BufferState) -> Result<()> {
        if state.removed {
            return Err(StrataError::BufferRemoved(self.id.clone()));
        }
        Ok(())
    }

    fn check_writable(&self, state: &BufferState) -> Result<()> {
        self.check_live(state)?;
        if state.is_final {
            return Err(StrataError::InvalidArgument(format!(
                "tuple buffer {} is final",
                self.id
            )));
        }
        Ok(())
    }

    /// Flushes the tail into a new managed batch.
    fn save_batch(&self, state: &mut BufferState) -> Result<()> {
        if state.tail.is_empty() {
            return Ok(());
        }
        let begin = state.tail_start();
        let tuples = std::mem::take(&mut state.tail);
        let rows = tuples.len();
        let handle = self
            .manager
            .create_managed_batch(TupleBatch::new(begin, tuples), &self.types)?;
        if state.prefers_memory {
            handle.set_prefers_memory(true);
        }
        state.batches.insert(begin, handle);
        tracing::trace!(buffer = %self.id, begin, rows, "flushed batch");
        Ok(())
    }

    fn truncate_locked(&self, state: &mut BufferState, rows: u64) -> Result<()> {
        // rows still in the tail
        let tail_start = state.tail_start();
        if rows >= tail_start {
            state.tail.truncate((rows + 1 - tail_start) as usize);
            state.row_count = rows;
            return Ok(());
        }
        state.tail.clear();

        for batch in state.batches.split_off(&(rows + 1)).into_values() {
            batch.remove();
        }

        // the last remaining batch may straddle the new end
        if let Some((&start, handle)) = state.batches.iter().next_back() {
            let batch = handle.get_batch(false)?;
            if batch.end_row() > rows {
                let mut tuples = batch.into_tuples();
                tuples.truncate((rows + 1 - start) as usize);
                if let Some(handle) = state.batches.remove(&start) {
                    handle.remove();
                }
                state.tail = tuples;
            }
        }

        state.row_count = rows;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use strata_common::Value;

    fn create_test_buffer(batch_size: usize) -> TupleBuffer {
        let config = BufferConfig {
            processor_batch_size: batch_size,
            ..Default::default()
        };
        TupleBuffer::new(
            "tb_test",
            vec![TypeId::Int64],
            Arc::new(BufferPool::in_memory(1000)),
            &config,
        )
        .unwrap()
    }

    fn row(i: i64) -> Tuple {
        Tuple::new(vec![Value::Int64(i)])
    }

    fn value_at(buffer: &TupleBuffer, r: u64) -> Value {
        let batch = buffer.get_batch(r).unwrap();
        batch.tuple(r).unwrap().get(0).cloned().unwrap()
    }

    #[test]
    fn test_append_flushes_at_batch_size() {
        let buffer = create_test_buffer(4);
        for i in 1..=10 {
            buffer.append(row(i)).unwrap();
        }
        assert_eq!(buffer.row_count(), 10);
        assert_eq!(buffer.managed_batch_count(), 2);

        // rows 9..10 come from the tail
        let tail = buffer.get_batch(10).unwrap();
        assert_eq!(tail.begin_row(), 9);
        assert_eq!(tail.end_row(), 10);

        let flushed = buffer.get_batch(6).unwrap();
        assert_eq!(flushed.begin_row(), 5);
        assert_eq!(flushed.end_row(), 8);
        for r in 1..=10 {
            assert_eq!(value_at(&buffer, r), Value::Int64(r as i64));
        }
    }

    #[test]
    fn test_past_end_returns_empty_batch() {
        let buffer = create_test_buffer(4);
        buffer.append(row(1)).unwrap();
        let batch = buffer.get_batch(5).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.begin_row(), 2);
        assert!(!batch.termination_flag());

        buffer.close().unwrap();
        assert!(buffer.get_batch(5).unwrap().termination_flag());
    }

    #[test]
    fn test_set_final_reopens_for_appends() {
        let buffer = create_test_buffer(4);
        buffer.append(row(1)).unwrap();
        buffer.set_final(true).unwrap();
        assert!(buffer.is_final());
        assert!(buffer.append(row(2)).is_err());

        buffer.set_final(false).unwrap();
        buffer.append(row(2)).unwrap();
        assert_eq!(buffer.row_count(), 2);
        assert!(!buffer.get_batch(2).unwrap().termination_flag());
    }

    #[test]
    fn test_close_sets_termination_on_last_batch() {
        let buffer = create_test_buffer(4);
        for i in 1..=6 {
            buffer.append(row(i)).unwrap();
        }
        buffer.close().unwrap();
        assert!(buffer.is_final());
        assert_eq!(buffer.managed_batch_count(), 2);
        assert!(!buffer.get_batch(1).unwrap().termination_flag());
        assert!(buffer.get_batch(6).unwrap().termination_flag());

        assert!(buffer.append(row(7)).is_err());
        buffer.close().unwrap();
    }

    #[test]
    fn test_add_batch_persist() {
        let buffer = create_test_buffer(3);
        let upstream = TupleBatch::new(1, (1..=5).map(row).collect());
        buffer.add_batch(&upstream, true).unwrap();
        assert_eq!(buffer.row_count(), 5);
        // overlapping rows are not appended twice
        let overlap = TupleBatch::new(4, (4..=7).map(row).collect());
        buffer.add_batch(&overlap, true).unwrap();
        assert_eq!(buffer.row_count(), 7);
        for r in 1..=7 {
            assert_eq!(value_at(&buffer, r), Value::Int64(r as i64));
        }

        let gap = TupleBatch::new(20, vec![row(20)]);
        assert!(buffer.add_batch(&gap, true).is_err());
    }

    #[test]
    fn test_add_batch_without_persist_only_advances() {
        let buffer = create_test_buffer(10);
        buffer.append(row(1)).unwrap();
        let upstream = TupleBatch::new(2, (2..=4).map(row).collect());
        buffer.add_batch(&upstream, false).unwrap();
        assert_eq!(buffer.row_count(), 4);
        // the tail was flushed before advancing
        assert_eq!(buffer.managed_batch_count(), 1);
        assert_eq!(value_at(&buffer, 1), Value::Int64(1));
        assert!(matches!(
            buffer.get_batch(3),
            Err(StrataError::RowUnavailable { row: 3, .. })
        ));

        // a batch behind the row count never truncates
        let stale = TupleBatch::new(1, (1..=2).map(row).collect());
        assert!(matches!(
            buffer.add_batch(&stale, false),
            Err(StrataError::InvalidArgument(_))
        ));
        assert_eq!(buffer.row_count(), 4);
        assert_eq!(value_at(&buffer, 1), Value::Int64(1));
    }

    #[test]
    fn test_truncate_to() {
        let buffer = create_test_buffer(4);
        for i in 1..=10 {
            buffer.append(row(i)).unwrap();
        }
        buffer.truncate_to(6).unwrap();
        assert_eq!(buffer.row_count(), 6);
        assert_eq!(buffer.managed_batch_count(), 1);
        for r in 1..=6 {
            assert_eq!(value_at(&buffer, r), Value::Int64(r as i64));
        }
        assert!(buffer.get_batch(7).unwrap().is_empty());

        // appends continue after the cut
        buffer.append(row(70)).unwrap();
        assert_eq!(value_at(&buffer, 7), Value::Int64(70));

        buffer.set_row_count(2).unwrap();
        assert_eq!(buffer.row_count(), 2);
        assert_eq!(value_at(&buffer, 2), Value::Int64(2));
    }

    #[test]
    fn test_forward_only_releases_read_batches() {
        let buffer = create_test_buffer(4);
        for i in 1..=8 {
            buffer.append(row(i)).unwrap();
        }
        buffer.close().unwrap();
        buffer.set_forward_only(true);

        assert_eq!(buffer.get_batch(1).unwrap().end_row(), 4);
        assert_eq!(buffer.managed_batch_count(), 1);
        assert!(buffer.get_batch(2).is_err());
        assert!(buffer.get_batch(5).unwrap().termination_flag());
        assert_eq!(buffer.managed_batch_count(), 0);
    }

    #[test]
    fn test_purge_and_reuse() {
        let buffer = create_test_buffer(2);
        for i in 1..=5 {
            buffer.append(row(i)).unwrap();
        }
        buffer.close().unwrap();
        buffer.purge().unwrap();
        assert_eq!(buffer.row_count(), 0);
        assert!(!buffer.is_final());
        assert_eq!(buffer.managed_batch_count(), 0);

        buffer.append(row(42)).unwrap();
        assert_eq!(value_at(&buffer, 1), Value::Int64(42));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let buffer = create_test_buffer(2);
        for i in 1..=5 {
            buffer.append(row(i)).unwrap();
        }
        buffer.remove();
        buffer.remove();
        assert!(buffer.is_removed());
        assert!(matches!(buffer.get_batch(1), Err(StrataError::BufferRemoved(_))));
        assert!(matches!(buffer.append(row(6)), Err(StrataError::BufferRemoved(_))));
    }

    #[test]
    fn test_prefers_memory_applies_to_new_batches() {
        let pool = BufferPool::in_memory(4);
        let config = BufferConfig {
            processor_batch_size: 4,
            ..Default::default()
        };
        let buffer = TupleBuffer::new("tb_pref", vec![TypeId::Int64], Arc::new(pool.clone()), &config).unwrap();
        buffer.set_prefers_memory(true);
        for i in 1..=4 {
            buffer.append(row(i)).unwrap();
        }

        let other = pool
            .create_managed_batch(TupleBatch::new(1, (1..=4).map(row).collect()), &[TypeId::Int64])
            .unwrap();
        // the unhinted batch is evicted instead of the buffer's
        assert_eq!(value_at(&buffer, 1), Value::Int64(1));
        assert_eq!(pool.stats().reloads, 0);
        other.remove();
    }
}
