//! Skip-list structured page tree with a range browser.
//!
//! An `STree` keeps tuples sorted by a key prefix in pages of up to
//! `page_size` entries. Levels are linked chains of pages:
//!
//! ```text
//! level 1:  [k0 ->p0, k5 ->p1] ------------------> [k9 ->p2]
//!                      |                              |
//! level 0:  [k0..k4] -> [k5..k8] ----------------> [k9..k12]
//!              p0         p1                          p2
//! ```
//!
//! - A new key is promoted to each further level with probability about
//!   `1 / page_size`, so height tracks `log_page_size(rows)`.
//! - Ordered bulk loads promote deterministically from the row count.
//! - A search moves right along a level before descending, so a level
//!   behaves as one sorted list of pages.
//! - Pages at or above `leaf_batch_threshold` entries keep their payload in a
//!   managed batch that the tiering pool may spill.
//!
//! `TupleBrowser` walks the leaf level in either direction between bounds or
//! across an ordered list of probe keys.

mod browser;
mod comparator;
mod page;
mod random;
mod tree;

pub use browser::{BrowseOptions, Direction, TupleBrowser};
pub use comparator::{KeyComparator, SortOrder, TupleComparator};
pub use page::{Level, PageArena, PageId, PageValues, SPage};
pub use random::{levels_for_rows, LevelGenerator};
pub use tree::{InsertMode, STree, MAX_HEIGHT};
