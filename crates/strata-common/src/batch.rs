//! Row-numbered tuple batches.

use crate::tuple::Tuple;

/// An immutable, row-numbered window of tuples.
///
/// Rows are numbered from 1. `end_row = begin_row + len - 1`, so an empty
/// batch has `end_row == begin_row - 1`. The termination flag marks that no
/// rows will ever follow this batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleBatch {
    begin_row: u64,
    tuples: Vec<Tuple>,
    termination: bool,
}

impl TupleBatch {
    /// Creates a batch whose first tuple is row `begin_row`.
    pub fn new(begin_row: u64, tuples: Vec<Tuple>) -> Self {
        debug_assert!(begin_row >= 1, "rows are numbered from 1");
        Self {
            begin_row,
            tuples,
            termination: false,
        }
    }

    /// Creates an empty batch positioned at `begin_row`.
    pub fn empty(begin_row: u64) -> Self {
        Self::new(begin_row, Vec::new())
    }

    /// Returns this batch with the termination flag set as given.
    pub fn with_termination(mut self, termination: bool) -> Self {
        self.termination = termination;
        self
    }

    #[inline]
    pub fn begin_row(&self) -> u64 {
        self.begin_row
    }

    #[inline]
    pub fn end_row(&self) -> u64 {
        self.begin_row + self.tuples.len() as u64 - 1
    }

    /// Returns the number of rows in the batch.
    #[inline]
    pub fn row_count(&self) -> usize {
        self.tuples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Returns true if no rows follow this batch.
    #[inline]
    pub fn termination_flag(&self) -> bool {
        self.termination
    }

    #[inline]
    pub fn contains_row(&self, row: u64) -> bool {
        row >= self.begin_row && row <= self.end_row()
    }

    /// Returns the tuple at an absolute row number.
    pub fn tuple(&self, row: u64) -> Option<&Tuple> {
        if !self.contains_row(row) {
            return None;
        }
        self.tuples.get((row - self.begin_row) as usize)
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }
}
