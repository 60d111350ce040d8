//! Bidirectional range browser over an STree.

use super::page::PageId;
use super::tree::{InsertMode, STree, SeekBound};
use std::cmp::Ordering;
use strata_common::{Result, StrataError, Tuple, Value};

/// Iteration order of a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// What a `TupleBrowser` visits.
///
/// Bounds are inclusive and prefix-aware: a partial upper bound includes
/// every tuple whose key starts with it. With `probes` set the browser seeks
/// to each probe key in turn; a probe shorter than the key length, or any
/// probe when `range_scan` is set, visits every tuple sharing that prefix.
/// Probes are given in ascending key order.
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    pub lower: Option<Vec<Value>>,
    pub upper: Option<Vec<Value>>,
    pub probes: Option<Vec<Vec<Value>>>,
    pub range_scan: bool,
    pub direction: Direction,
}

/// Key interval currently being scanned.
#[derive(Debug, Clone)]
struct Window {
    lower: Option<Vec<Value>>,
    upper: Option<Vec<Value>>,
}

enum WindowStep {
    Range(Window),
    Point(Vec<Value>),
    Exhausted,
}

/// Copy of one leaf page and a position in it.
struct Cursor {
    page: PageId,
    values: Vec<Tuple>,
    /// Ascending: index of the next entry. Descending: one past it.
    pos: usize,
    /// Index of the entry returned last.
    last: Option<usize>,
}

/// Stateful cursor over an `STree`.
///
/// The browser does not borrow the tree between calls, so the caller may
/// modify the tree while browsing. A changed tree version makes the next call
/// re-seek just past the last returned key.
pub struct TupleBrowser {
    options: BrowseOptions,
    window: Option<Window>,
    cursor: Option<Cursor>,
    probe_pos: usize,
    started: bool,
    done: bool,
    last_key: Option<Vec<Value>>,
    version: u64,
}

impl TupleBrowser {
    pub fn new(options: BrowseOptions) -> Self {
        Self {
            options,
            window: None,
            cursor: None,
            probe_pos: 0,
            started: false,
            done: false,
            last_key: None,
            version: 0,
        }
    }

    /// Browses keys within `lower..=upper`; a missing bound is open.
    pub fn range(lower: Option<Vec<Value>>, upper: Option<Vec<Value>>, direction: Direction) -> Self {
        Self::new(BrowseOptions {
            lower,
            upper,
            direction,
            ..Default::default()
        })
    }

    /// Browses the whole tree.
    pub fn full_scan(direction: Direction) -> Self {
        Self::new(BrowseOptions {
            range_scan: true,
            direction,
            ..Default::default()
        })
    }

    /// Browses the tuples matching each probe key.
    pub fn probes(keys: Vec<Vec<Value>>, range_scan: bool, direction: Direction) -> Self {
        Self::new(BrowseOptions {
            probes: Some(keys),
            range_scan,
            direction,
            ..Default::default()
        })
    }

    pub fn options(&self) -> &BrowseOptions {
        &self.options
    }

    pub fn direction(&self) -> Direction {
        self.options.direction
    }

    /// Returns the next tuple, or `None` once the browse is finished.
    pub fn next(&mut self, tree: &STree) -> Result<Option<Tuple>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.window.is_none() {
                match self.next_window(tree.key_length()) {
                    WindowStep::Range(window) => {
                        self.window = Some(window);
                        self.cursor = None;
                        self.last_key = None;
                    }
                    WindowStep::Point(key) => {
                        self.cursor = None;
                        if let Some(tuple) = tree.find(&key)? {
                            if self.within_bounds(tree, &tuple) {
                                self.last_key = Some(tuple.key(tree.key_length()).to_vec());
                                return Ok(Some(tuple));
                            }
                        }
                        continue;
                    }
                    WindowStep::Exhausted => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            if self.cursor.is_none() || self.version != tree.version() {
                self.seek(tree)?;
            }
            let Some(tuple) = self.step(tree)? else {
                self.close_window();
                continue;
            };
            if self.past_window(tree, &tuple) {
                self.close_window();
                continue;
            }
            self.last_key = Some(tuple.key(tree.key_length()).to_vec());
            if self.within_bounds(tree, &tuple) {
                return Ok(Some(tuple));
            }
        }
    }

    /// Replaces the tuple returned last. The key must not change.
    pub fn update(&mut self, tree: &mut STree, tuple: Tuple) -> Result<()> {
        let last_key = self
            .last_key
            .as_ref()
            .ok_or_else(|| StrataError::InvalidArgument("browser has no current tuple".to_string()))?;
        if tree.compare(tuple.key(tree.key_length()), last_key) != Ordering::Equal {
            return Err(StrataError::InvalidArgument(
                "browser update must not change the key".to_string(),
            ));
        }
        let in_sync = self.version == tree.version();
        tree.insert(tuple.clone(), InsertMode::Update, None)?;
        // an in-place update leaves the page layout intact
        if in_sync {
            if let Some(cursor) = self.cursor.as_mut() {
                if let Some(slot) = cursor.last.and_then(|i| cursor.values.get_mut(i)) {
                    *slot = tuple;
                }
            }
            self.version = tree.version();
        }
        Ok(())
    }

    /// Tells the browser the tuple returned last was removed from the tree.
    pub fn removed(&mut self) {
        self.cursor = None;
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    fn next_window(&mut self, key_length: usize) -> WindowStep {
        let Some(probes) = &self.options.probes else {
            if self.started {
                return WindowStep::Exhausted;
            }
            self.started = true;
            return WindowStep::Range(Window {
                lower: self.options.lower.clone(),
                upper: self.options.upper.clone(),
            });
        };
        if self.probe_pos >= probes.len() {
            return WindowStep::Exhausted;
        }
        let index = match self.options.direction {
            Direction::Ascending => self.probe_pos,
            Direction::Descending => probes.len() - 1 - self.probe_pos,
        };
        self.probe_pos += 1;
        let probe = probes[index].clone();
        if self.options.range_scan || probe.len() < key_length {
            WindowStep::Range(Window {
                lower: Some(probe.clone()),
                upper: Some(probe),
            })
        } else {
            WindowStep::Point(probe)
        }
    }

    fn close_window(&mut self) {
        self.window = None;
        self.cursor = None;
    }

    /// Positions the cursor at the window start, or just past the last
    /// returned key when resuming.
    fn seek(&mut self, tree: &STree) -> Result<()> {
        self.version = tree.version();
        let Some(window) = &self.window else {
            self.cursor = None;
            return Ok(());
        };
        let (page, pos) = match (self.options.direction, &self.last_key) {
            (Direction::Ascending, Some(last)) => tree.seek_leaf(last, SeekBound::AtOrBefore)?,
            (Direction::Ascending, None) => match &window.lower {
                Some(lower) => tree.seek_leaf(lower, SeekBound::Before)?,
                None => (tree.leaf_head(), 0),
            },
            (Direction::Descending, Some(last)) => tree.seek_leaf(last, SeekBound::Before)?,
            (Direction::Descending, None) => match &window.upper {
                Some(upper) => tree.seek_leaf(upper, SeekBound::AtOrBefore)?,
                None => (tree.leaf_tail(), usize::MAX),
            },
        };
        let values = tree.leaf_values(page)?;
        self.cursor = Some(Cursor {
            page,
            pos: pos.min(values.len()),
            values,
            last: None,
        });
        Ok(())
    }

    /// Moves one entry in the browse direction, crossing pages.
    fn step(&mut self, tree: &STree) -> Result<Option<Tuple>> {
        let direction = self.options.direction;
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        loop {
            match direction {
                Direction::Ascending => {
                    if cursor.pos < cursor.values.len() {
                        cursor.last = Some(cursor.pos);
                        cursor.pos += 1;
                        return Ok(Some(cursor.values[cursor.pos - 1].clone()));
                    }
                    let Some(next) = tree.next_page(cursor.page)? else {
                        return Ok(None);
                    };
                    cursor.values = tree.leaf_values(next)?;
                    cursor.page = next;
                    cursor.pos = 0;
                }
                Direction::Descending => {
                    if cursor.pos > 0 {
                        cursor.pos -= 1;
                        cursor.last = Some(cursor.pos);
                        return Ok(Some(cursor.values[cursor.pos].clone()));
                    }
                    let Some(prev) = tree.prev_page(cursor.page)? else {
                        return Ok(None);
                    };
                    cursor.values = tree.leaf_values(prev)?;
                    cursor.page = prev;
                    cursor.pos = cursor.values.len();
                }
            }
        }
    }

    fn past_window(&self, tree: &STree, tuple: &Tuple) -> bool {
        let Some(window) = &self.window else {
            return true;
        };
        let key = tuple.key(tree.key_length());
        match self.options.direction {
            Direction::Ascending => window
                .upper
                .as_ref()
                .is_some_and(|upper| tree.compare(key, upper) == Ordering::Greater),
            Direction::Descending => window
                .lower
                .as_ref()
                .is_some_and(|lower| tree.compare(key, lower) == Ordering::Less),
        }
    }

    fn within_bounds(&self, tree: &STree, tuple: &Tuple) -> bool {
        let key = tuple.key(tree.key_length());
        let above_lower = self
            .options
            .lower
            .as_ref()
            .map_or(true, |lower| tree.compare(key, lower) != Ordering::Less);
        let below_upper = self
            .options
            .upper
            .as_ref()
            .map_or(true, |upper| tree.compare(key, upper) != Ordering::Greater);
        above_lower && below_upper
    }
}
