//! Key ordering for tree entries.

use std::cmp::Ordering;
use strata_common::{compare_values, Value};

/// Sort direction of one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Orders key prefixes.
///
/// Implementations compare only the columns both sides carry, so a partial
/// key compares equal to every full key it is a prefix of.
pub trait TupleComparator: Send + Sync {
    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering;
}

/// Column-wise comparator with a direction per key column. Columns beyond
/// the configured directions sort ascending.
#[derive(Debug, Clone, Default)]
pub struct KeyComparator {
    orders: Vec<SortOrder>,
}

impl KeyComparator {
    pub fn new(orders: Vec<SortOrder>) -> Self {
        Self { orders }
    }

    /// All columns ascending.
    pub fn ascending(key_length: usize) -> Self {
        Self::new(vec![SortOrder::Ascending; key_length])
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }
}

impl TupleComparator for KeyComparator {
    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            let ord = compare_values(x, y);
            let ord = match self.orders.get(i) {
                Some(SortOrder::Descending) => ord.reverse(),
                _ => ord,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
