//! Sorted tuple index for strata.
//!
//! This crate provides:
//! - Skip-list structured page tree with point lookup, insert, update and remove
//! - Ordered bulk load with deterministic leveling
//! - Prefix-aware key comparator
//! - Bidirectional range browser with probe keys

mod stree;

pub use stree::{
    levels_for_rows, BrowseOptions, Direction, InsertMode, KeyComparator, Level, LevelGenerator,
    PageArena, PageId, PageValues, SPage, STree, SortOrder, TupleBrowser, TupleComparator,
    MAX_HEIGHT,
};
