//! Skip-list structured page tree.

use super::comparator::TupleComparator;
use super::page::{Level, PageArena, PageId, PageValues, SPage};
use super::random::{levels_for_rows, LevelGenerator};
use parking_lot::{Mutex, MutexGuard};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;
use strata_buffer::{BatchManager, LobManager};
use strata_common::{Result, StrataError, TreeConfig, Tuple, TupleBatch, TypeId, Value};

/// Upper bound on tree levels, leaf level included.
pub const MAX_HEIGHT: usize = 32;

/// How `STree::insert` treats the new tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Keeps the existing tuple when the key is present.
    New,
    /// Replaces the existing tuple when the key is present.
    Update,
    /// Appends at the tail. Keys must arrive in non-decreasing order.
    Ordered,
}

/// Which entries a descent treats as lying before the search key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeekBound {
    /// Entries strictly less than the key.
    Before,
    /// Entries less than or equal to the key.
    AtOrBefore,
}

/// Per-level result of a descent: the page holding the last entry that
/// satisfies the bound, and the number of satisfying entries in it.
pub(crate) struct SearchPath {
    stop_level: usize,
    entries: Vec<(PageId, usize)>,
}

impl SearchPath {
    pub(crate) fn at(&self, level: usize) -> Option<(PageId, usize)> {
        level
            .checked_sub(self.stop_level)
            .and_then(|i| self.entries.get(i).copied())
    }
}

/// Balanced search tree over sorted tuples.
///
/// Each level is a doubly linked chain of pages; level 0 holds the tuples,
/// every higher level holds key tuples with a pointer to the page one level
/// down that contains the same key. A page with at least
/// `leaf_batch_threshold` entries keeps its payload in a managed batch so the
/// tiering pool may spill it.
///
/// ```text
/// level 2:  [10] --------------------------------> [70]
///            |                                      |
/// level 1:  [10, 40] ----------------> [55] -----> [70, 90]
///            |   |                      |           |   |
/// level 0:  [3, 10, 22] -> [40, 41] -> [55, 60] -> [70, 81, 90, 95]
/// ```
///
/// Mutations take `&mut self`; callers sharing a tree across threads
/// serialize them, optionally through `update_lock`.
pub struct STree {
    id: String,
    types: Vec<TypeId>,
    key_length: usize,
    config: TreeConfig,
    comparator: Arc<dyn TupleComparator>,
    manager: Arc<dyn BatchManager>,
    lobs: Option<LobManager>,
    arena: PageArena,
    levels: Vec<Level>,
    row_count: u64,
    level_gen: LevelGenerator,
    version: u64,
    prefers_memory: bool,
    update_lock: Mutex<()>,
}

impl STree {
    /// Creates an empty tree keyed on the first `key_length` columns.
    pub fn new(
        id: impl Into<String>,
        types: Vec<TypeId>,
        key_length: usize,
        comparator: Arc<dyn TupleComparator>,
        manager: Arc<dyn BatchManager>,
        config: &TreeConfig,
    ) -> Result<Self> {
        config.validate()?;
        if key_length == 0 || key_length > types.len() {
            return Err(StrataError::InvalidArgument(format!(
                "key length {} out of range for {} columns",
                key_length,
                types.len()
            )));
        }
        let mut arena = PageArena::new();
        let root = arena.allocate(SPage::new());
        Ok(Self {
            id: id.into(),
            lobs: LobManager::for_types(&types),
            types,
            key_length,
            config: config.clone(),
            comparator,
            manager,
            arena,
            levels: vec![Level {
                head: root,
                tail: root,
            }],
            row_count: 0,
            level_gen: LevelGenerator::new(config.seed, config.page_size),
            version: 0,
            prefers_memory: false,
            update_lock: Mutex::new(()),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    #[inline]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Number of levels, leaf level included.
    #[inline]
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Number of live pages over all levels.
    pub fn page_count(&self) -> usize {
        self.arena.len()
    }

    /// Bumped by every modification.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Exclusion lock for callers that share the tree. Not taken internally.
    pub fn update_lock(&self) -> MutexGuard<'_, ()> {
        self.update_lock.lock()
    }

    /// Drops the trailing key column, typically a synthetic row id.
    pub fn remove_row_id_from_key(&mut self) -> Result<()> {
        if self.key_length <= 1 {
            return Err(StrataError::InvalidArgument(format!(
                "tree {} key has no column to drop",
                self.id
            )));
        }
        self.key_length -= 1;
        self.version += 1;
        Ok(())
    }

    /// Marks leaf batches as worth keeping in memory. Index levels always are.
    pub fn set_prefers_memory(&mut self, prefers: bool) -> Result<()> {
        self.prefers_memory = prefers;
        let mut page = Some(self.levels[0].head);
        while let Some(id) = page {
            let p = self.arena.get(id)?;
            if let PageValues::Managed { batch, .. } = &p.values {
                batch.set_prefers_memory(prefers);
            }
            page = p.next;
        }
        Ok(())
    }

    pub fn lob_manager(&self) -> Option<&LobManager> {
        self.lobs.as_ref()
    }

    #[inline]
    pub(crate) fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        self.comparator.compare(a, b)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns the tuple whose key equals `key`. A partial key matches the
    /// last tuple carrying that prefix.
    pub fn find(&self, key: &[Value]) -> Result<Option<Tuple>> {
        let (leaf, n) = self.seek_leaf(key, SeekBound::AtOrBefore)?;
        if n == 0 {
            return Ok(None);
        }
        let values = self.page_values(leaf, 0)?;
        Ok(values
            .get(n - 1)
            .filter(|t| self.compare(t.key(self.key_length), key) == Ordering::Equal)
            .cloned())
    }

    /// Leaf page and entry count for `key` under `bound`.
    pub(crate) fn seek_leaf(&self, key: &[Value], bound: SeekBound) -> Result<(PageId, usize)> {
        self.descend(key, bound, 0)?
            .at(0)
            .ok_or_else(|| StrataError::Internal(format!("tree {} has no leaf level", self.id)))
    }

    /// Walks from the top level down to `stop_level`, moving right along a
    /// level while the next page still starts with a satisfying entry.
    pub(crate) fn descend(
        &self,
        key: &[Value],
        bound: SeekBound,
        stop_level: usize,
    ) -> Result<SearchPath> {
        let height = self.levels.len();
        let mut entries = vec![(self.levels[0].head, 0); height.saturating_sub(stop_level)];
        let mut start = None;
        for level in (stop_level..height).rev() {
            let mut page = start.unwrap_or(self.levels[level].head);
            let n = loop {
                let values = self.page_values(page, level)?;
                let n = values.partition_point(|entry| self.satisfies(entry, key, bound));
                if n == values.len() {
                    if let Some(next) = self.arena.get(page)?.next {
                        if self.first_satisfies(next, level, key, bound)? {
                            page = next;
                            continue;
                        }
                    }
                }
                break n;
            };
            entries[level - stop_level] = (page, n);
            start = None;
            if n > 0 && level > stop_level {
                let child = self.arena.get(page)?.children.get(n - 1).copied();
                start = Some(child.ok_or_else(|| {
                    StrataError::Internal(format!("{} at level {} lacks a child", page, level))
                })?);
            }
        }
        Ok(SearchPath {
            stop_level,
            entries,
        })
    }

    #[inline]
    fn satisfies(&self, entry: &Tuple, key: &[Value], bound: SeekBound) -> bool {
        let ord = self.compare(entry.key(self.key_length), key);
        match bound {
            SeekBound::Before => ord == Ordering::Less,
            SeekBound::AtOrBefore => ord != Ordering::Greater,
        }
    }

    fn first_satisfies(&self, page: PageId, level: usize, key: &[Value], bound: SeekBound) -> Result<bool> {
        let values = self.page_values(page, level)?;
        Ok(values.first().is_some_and(|e| self.satisfies(e, key, bound)))
    }

    // =========================================================================
    // Page payloads
    // =========================================================================

    fn page_len(&self, id: PageId) -> Result<usize> {
        Ok(self.arena.get(id)?.len())
    }

    /// Entries of a page, loading a managed payload when needed.
    fn page_values(&self, id: PageId, level: usize) -> Result<Cow<'_, [Tuple]>> {
        match &self.arena.get(id)?.values {
            PageValues::Resident(values) => Ok(Cow::Borrowed(values.as_slice())),
            PageValues::Managed { batch, .. } => {
                let mut tuples = batch.get_batch(true)?.into_tuples();
                if level == 0 {
                    self.rehydrate(&mut tuples)?;
                }
                Ok(Cow::Owned(tuples))
            }
        }
    }

    fn rehydrate(&self, tuples: &mut [Tuple]) -> Result<()> {
        if let Some(lobs) = &self.lobs {
            for tuple in tuples.iter_mut() {
                lobs.update_references(tuple)?;
            }
        }
        Ok(())
    }

    /// Moves a page's entries out for modification. Must be paired with
    /// `set_values`.
    /// The page is left untouched if loading fails.
    fn take_values(&mut self, id: PageId, level: usize) -> Result<Vec<Tuple>> {
        let batch = match &mut self.arena.get_mut(id)?.values {
            PageValues::Resident(values) => return Ok(std::mem::take(values)),
            PageValues::Managed { batch, .. } => batch.clone(),
        };
        let mut tuples = batch.get_batch(false)?.into_tuples();
        if level == 0 {
            self.rehydrate(&mut tuples)?;
        }
        batch.remove();
        self.arena.get_mut(id)?.values = PageValues::Resident(Vec::new());
        Ok(tuples)
    }

    /// Stores a page's entries, moving them into or out of a managed batch
    /// as the count crosses the threshold.
    ///
    /// A batch the pool cannot create leaves the entries resident, so callers
    /// never lose entries halfway through a modification.
    fn set_values(&mut self, id: PageId, level: usize, values: Vec<Tuple>) -> Result<()> {
        // index entries may be wider than the key after remove_row_id_from_key
        let types: &[TypeId] = if level == 0 { &self.types } else { &[] };
        let payload = if values.len() >= self.config.leaf_batch_threshold {
            let len = values.len();
            match self
                .manager
                .create_managed_batch(TupleBatch::new(1, values.clone()), types)
            {
                Ok(batch) => {
                    if level > 0 || self.prefers_memory {
                        batch.set_prefers_memory(true);
                    }
                    PageValues::Managed { batch, len }
                }
                Err(e) => {
                    tracing::warn!(tree = %self.id, page = %id, error = %e, "page kept resident");
                    PageValues::Resident(values)
                }
            }
        } else {
            PageValues::Resident(values)
        };
        if let PageValues::Managed { batch, .. } =
            std::mem::replace(&mut self.arena.get_mut(id)?.values, payload)
        {
            batch.remove();
        }
        Ok(())
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a tuple.
    ///
    /// Returns the tuple already stored under the same key, if any. In `New`
    /// and `Ordered` mode that tuple is kept; in `Update` mode it is replaced.
    /// `size_hint`, the expected final row count, caps promotion height.
    pub fn insert(
        &mut self,
        mut tuple: Tuple,
        mode: InsertMode,
        size_hint: Option<u64>,
    ) -> Result<Option<Tuple>> {
        if tuple.len() < self.key_length {
            return Err(StrataError::InvalidArgument(format!(
                "tuple of {} columns is shorter than key length {}",
                tuple.len(),
                self.key_length
            )));
        }
        if let Some(lobs) = &self.lobs {
            lobs.update_references(&mut tuple)?;
        }
        match mode {
            InsertMode::Ordered => self.insert_ordered(tuple),
            InsertMode::New | InsertMode::Update => self.insert_searched(tuple, mode, size_hint),
        }
    }

    fn insert_searched(
        &mut self,
        tuple: Tuple,
        mode: InsertMode,
        size_hint: Option<u64>,
    ) -> Result<Option<Tuple>> {
        let key = tuple.key(self.key_length).to_vec();
        let path = self.descend(&key, SeekBound::AtOrBefore, 0)?;
        let (leaf, n) = path
            .at(0)
            .ok_or_else(|| StrataError::Internal(format!("tree {} has no leaf level", self.id)))?;

        if n > 0 {
            let existing = self.page_values(leaf, 0)?.get(n - 1).cloned();
            if let Some(existing) = existing {
                if self.compare(existing.key(self.key_length), &key) == Ordering::Equal {
                    if mode == InsertMode::Update {
                        let mut values = self.take_values(leaf, 0)?;
                        values[n - 1] = tuple;
                        self.set_values(leaf, 0, values)?;
                        self.version += 1;
                    }
                    return Ok(Some(existing));
                }
            }
        }

        let mut max_level = self.levels.len().min(MAX_HEIGHT - 1);
        if let Some(rows) = size_hint {
            max_level = max_level.min(levels_for_rows(rows, self.config.page_size));
        }
        let level = self.level_gen.next_level(max_level);

        let mut child = self.insert_at(0, leaf, n, tuple, None)?;
        // the row is stored once the leaf holds it; promotion only adds shortcuts
        self.row_count += 1;
        self.version += 1;
        for l in 1..=level {
            let (page, pos) = match path.at(l) {
                Some(found) => found,
                None => (self.push_level()?, 0),
            };
            child = self.insert_at(l, page, pos, Tuple::new(key.clone()), Some(child))?;
        }
        Ok(None)
    }

    /// Inserts an entry at `pos` of `page`, splitting a full page in half.
    /// Returns the page that holds the entry afterwards.
    fn insert_at(
        &mut self,
        level: usize,
        page: PageId,
        pos: usize,
        entry: Tuple,
        child: Option<PageId>,
    ) -> Result<PageId> {
        let mut values = self.take_values(page, level)?;
        if values.len() < self.config.page_size {
            values.insert(pos, entry);
            if let Some(child) = child {
                self.arena.get_mut(page)?.children.insert(pos, child);
            }
            self.set_values(page, level, values)?;
            return Ok(page);
        }

        let mid = values.len() / 2;
        let mut upper = values.split_off(mid);
        let mut upper_children = {
            let children = &mut self.arena.get_mut(page)?.children;
            if children.len() > mid {
                children.split_off(mid)
            } else {
                Vec::new()
            }
        };
        let in_upper = pos > mid;
        if in_upper {
            upper.insert(pos - mid, entry);
            if let Some(child) = child {
                upper_children.insert(pos - mid, child);
            }
        } else {
            values.insert(pos, entry);
            if let Some(child) = child {
                self.arena.get_mut(page)?.children.insert(pos, child);
            }
        }

        let (lo, hi) = match (upper.first(), upper.last()) {
            (Some(first), Some(last)) => (
                first.key(self.key_length).to_vec(),
                last.key(self.key_length).to_vec(),
            ),
            _ => return Err(StrataError::Internal(format!("split of {} left no upper half", page))),
        };
        let sibling = self.link_after(level, page, upper_children)?;
        self.set_values(page, level, values)?;
        self.set_values(sibling, level, upper)?;
        self.repoint(level + 1, &lo, &hi, sibling)?;
        Ok(if in_upper { sibling } else { page })
    }

    fn insert_ordered(&mut self, tuple: Tuple) -> Result<Option<Tuple>> {
        let key = tuple.key(self.key_length).to_vec();
        let leaf_tail = self.levels[0].tail;
        let last = self.page_values(leaf_tail, 0)?.last().cloned();
        if let Some(last) = last {
            match self.compare(last.key(self.key_length), &key) {
                Ordering::Equal => return Ok(Some(last)),
                Ordering::Greater => {
                    return Err(StrataError::InvalidArgument(format!(
                        "ordered insert into tree {} below its last key",
                        self.id
                    )))
                }
                Ordering::Less => {}
            }
        }

        // a new leaf page starts every page_size rows; its first key climbs
        // one level for each power of page_size dividing the row count
        let page_size = self.config.page_size as u64;
        let mut level = 0;
        if self.page_len(leaf_tail)? >= self.config.page_size {
            let mut rows = self.row_count;
            while rows > 0 && rows % page_size == 0 && level < MAX_HEIGHT - 1 {
                level += 1;
                rows /= page_size;
            }
            level = level.min(self.levels.len());
        }

        let mut leaf_entry = Some(tuple);
        let mut child = None;
        for l in 0..=level {
            if l == self.levels.len() {
                self.push_level()?;
            }
            let entry = match leaf_entry.take() {
                Some(tuple) => tuple,
                None => Tuple::new(key.clone()),
            };
            child = Some(self.append_at(l, entry, child)?);
            if l == 0 {
                self.row_count += 1;
                self.version += 1;
            }
        }
        Ok(None)
    }

    /// Appends to the tail of a level. A full tail gets a new page holding
    /// only the entry.
    fn append_at(&mut self, level: usize, entry: Tuple, child: Option<PageId>) -> Result<PageId> {
        let tail = self.levels[level].tail;
        if self.page_len(tail)? < self.config.page_size {
            let mut values = self.take_values(tail, level)?;
            values.push(entry);
            if let Some(child) = child {
                self.arena.get_mut(tail)?.children.push(child);
            }
            self.set_values(tail, level, values)?;
            return Ok(tail);
        }
        let sibling = self.link_after(level, tail, child.into_iter().collect())?;
        self.set_values(sibling, level, vec![entry])?;
        Ok(sibling)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes the tuple stored under `key` and returns it.
    pub fn remove(&mut self, key: &[Value]) -> Result<Option<Tuple>> {
        let path = self.descend(key, SeekBound::AtOrBefore, 0)?;
        let Some((leaf, n)) = path.at(0) else {
            return Ok(None);
        };
        if n == 0 {
            return Ok(None);
        }

        let mut values = self.take_values(leaf, 0)?;
        let found = values
            .get(n - 1)
            .is_some_and(|t| self.compare(t.key(self.key_length), key) == Ordering::Equal);
        if !found {
            self.set_values(leaf, 0, values)?;
            return Ok(None);
        }
        let removed = values.remove(n - 1);
        self.set_values(leaf, 0, values)?;
        self.rebalance(0, leaf)?;

        // promotion is contiguous from level 0, so stop at the first level
        // without the key
        let full_key = removed.key(self.key_length).to_vec();
        for level in 1..self.levels.len() {
            let Some((page, pos)) = path.at(level) else {
                break;
            };
            if pos == 0 {
                break;
            }
            let mut values = self.take_values(page, level)?;
            let found = values
                .get(pos - 1)
                .is_some_and(|t| self.compare(t.key(self.key_length), &full_key) == Ordering::Equal);
            if !found {
                self.set_values(page, level, values)?;
                break;
            }
            values.remove(pos - 1);
            let children = &mut self.arena.get_mut(page)?.children;
            if pos - 1 < children.len() {
                children.remove(pos - 1);
            }
            self.set_values(page, level, values)?;
            self.rebalance(level, page)?;
        }

        self.row_count -= 1;
        self.version += 1;
        self.compact()?;
        Ok(Some(removed))
    }

    /// Unlinks an emptied page, or merges a sparse page with a sparse
    /// neighbour (next first, then previous).
    fn rebalance(&mut self, level: usize, page: PageId) -> Result<()> {
        let (len, prev, next) = {
            let p = self.arena.get(page)?;
            (p.len(), p.prev, p.next)
        };
        if len == 0 {
            if prev.is_none() && next.is_none() {
                return Ok(());
            }
            self.unlink(level, page)?;
            return self.free_page(page);
        }
        let page_size = self.config.page_size;
        if len >= page_size / 2 {
            return Ok(());
        }
        if let Some(next) = next {
            if self.page_len(next)? < page_size / 4 {
                return self.merge_into(level, page, next);
            }
        }
        if let Some(prev) = prev {
            if self.page_len(prev)? < page_size / 4 {
                return self.merge_into(level, prev, page);
            }
        }
        Ok(())
    }

    /// Moves all entries of `src` onto the end of `dst`, its predecessor.
    fn merge_into(&mut self, level: usize, dst: PageId, src: PageId) -> Result<()> {
        let moved = self.take_values(src, level)?;
        let moved_children = std::mem::take(&mut self.arena.get_mut(src)?.children);
        let range = match (moved.first(), moved.last()) {
            (Some(first), Some(last)) => Some((
                first.key(self.key_length).to_vec(),
                last.key(self.key_length).to_vec(),
            )),
            _ => None,
        };
        let mut values = self.take_values(dst, level)?;
        values.extend(moved);
        self.arena.get_mut(dst)?.children.extend(moved_children);
        self.set_values(dst, level, values)?;
        self.unlink(level, src)?;
        self.free_page(src)?;
        if let Some((lo, hi)) = range {
            self.repoint(level + 1, &lo, &hi, dst)?;
        }
        Ok(())
    }

    /// Drops top levels reduced to a single page that is empty or sits above
    /// another single page.
    pub fn compact(&mut self) -> Result<()> {
        while self.levels.len() > 1 {
            let top = self.levels[self.levels.len() - 1];
            let below = self.levels[self.levels.len() - 2];
            if top.head != top.tail {
                break;
            }
            if self.page_len(top.head)? > 0 && below.head != below.tail {
                break;
            }
            self.levels.pop();
            self.free_page(top.head)?;
            self.version += 1;
            tracing::debug!(tree = %self.id, height = self.levels.len(), "tree level dropped");
        }
        Ok(())
    }

    /// Removes every tuple, leaving a single empty leaf level.
    pub fn truncate(&mut self) -> Result<()> {
        for page in self.arena.drain() {
            page.release();
        }
        let root = self.arena.allocate(SPage::new());
        self.levels = vec![Level {
            head: root,
            tail: root,
        }];
        self.row_count = 0;
        self.version += 1;
        if let Some(lobs) = &self.lobs {
            lobs.clear();
        }
        tracing::debug!(tree = %self.id, "tree truncated");
        Ok(())
    }

    // =========================================================================
    // Level maintenance
    // =========================================================================

    fn push_level(&mut self) -> Result<PageId> {
        if self.levels.len() >= MAX_HEIGHT {
            return Err(StrataError::Internal(format!(
                "tree {} reached maximum height {}",
                self.id, MAX_HEIGHT
            )));
        }
        let page = self.arena.allocate(SPage::new());
        self.levels.push(Level {
            head: page,
            tail: page,
        });
        tracing::debug!(
            tree = %self.id,
            height = self.levels.len(),
            rows = self.row_count,
            "tree level added"
        );
        Ok(page)
    }

    fn link_after(&mut self, level: usize, page: PageId, children: Vec<PageId>) -> Result<PageId> {
        let next = self.arena.get(page)?.next;
        let sibling = self.arena.allocate(SPage {
            values: PageValues::Resident(Vec::new()),
            children,
            next,
            prev: Some(page),
        });
        self.arena.get_mut(page)?.next = Some(sibling);
        match next {
            Some(next) => self.arena.get_mut(next)?.prev = Some(sibling),
            None => self.levels[level].tail = sibling,
        }
        Ok(sibling)
    }

    fn unlink(&mut self, level: usize, page: PageId) -> Result<()> {
        let (prev, next) = {
            let p = self.arena.get(page)?;
            (p.prev, p.next)
        };
        match prev {
            Some(prev) => self.arena.get_mut(prev)?.next = next,
            None => {
                if let Some(next) = next {
                    self.levels[level].head = next;
                }
            }
        }
        match next {
            Some(next) => self.arena.get_mut(next)?.prev = prev,
            None => {
                if let Some(prev) = prev {
                    self.levels[level].tail = prev;
                }
            }
        }
        Ok(())
    }

    fn free_page(&mut self, page: PageId) -> Result<()> {
        self.arena.free(page)?.release();
        Ok(())
    }

    /// Points every entry of `level` keyed within `lo..=hi` at `target`.
    fn repoint(&mut self, level: usize, lo: &[Value], hi: &[Value], target: PageId) -> Result<()> {
        if level >= self.levels.len() {
            return Ok(());
        }
        let Some((mut page, mut pos)) = self.descend(lo, SeekBound::Before, level)?.at(level) else {
            return Ok(());
        };
        loop {
            let (end, exhausted) = {
                let values = self.page_values(page, level)?;
                let mut end = pos;
                while end < values.len()
                    && self.compare(values[end].key(self.key_length), hi) != Ordering::Greater
                {
                    end += 1;
                }
                (end, end == values.len())
            };
            let children = &mut self.arena.get_mut(page)?.children;
            for slot in children.iter_mut().take(end).skip(pos) {
                *slot = target;
            }
            if !exhausted {
                return Ok(());
            }
            match self.arena.get(page)?.next {
                Some(next) => {
                    page = next;
                    pos = 0;
                }
                None => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Leaf navigation
    // =========================================================================

    pub(crate) fn leaf_head(&self) -> PageId {
        self.levels[0].head
    }

    pub(crate) fn leaf_tail(&self) -> PageId {
        self.levels[0].tail
    }

    pub(crate) fn leaf_values(&self, page: PageId) -> Result<Vec<Tuple>> {
        Ok(self.page_values(page, 0)?.into_owned())
    }

    pub(crate) fn next_page(&self, page: PageId) -> Result<Option<PageId>> {
        Ok(self.arena.get(page)?.next)
    }

    pub(crate) fn prev_page(&self, page: PageId) -> Result<Option<PageId>> {
        Ok(self.arena.get(page)?.prev)
    }

    // =========================================================================
    // Structure check
    // =========================================================================

    /// Walks every level and checks ordering, links, page sizes, child
    /// pointers and the row count.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |msg: String| StrataError::Internal(format!("tree {}: {}", self.id, msg));
        for (level, bounds) in self.levels.iter().enumerate() {
            let mut page = Some(bounds.head);
            let mut prev: Option<PageId> = None;
            let mut last_key: Option<Vec<Value>> = None;
            let mut entries = 0u64;
            while let Some(id) = page {
                let p = self.arena.get(id)?;
                if p.prev != prev {
                    return Err(corrupt(format!("{} at level {} has a stale back link", id, level)));
                }
                if p.len() > self.config.page_size {
                    return Err(corrupt(format!("{} at level {} overflows", id, level)));
                }
                if p.is_empty() && (p.prev.is_some() || p.next.is_some()) {
                    return Err(corrupt(format!("{} at level {} is empty but linked", id, level)));
                }
                if p.values.is_managed() && p.len() < self.config.leaf_batch_threshold {
                    return Err(corrupt(format!("{} at level {} is managed below threshold", id, level)));
                }
                let values = self.page_values(id, level)?;
                if level > 0 && p.children.len() != values.len() {
                    return Err(corrupt(format!("{} at level {} has mismatched children", id, level)));
                }
                for (i, entry) in values.iter().enumerate() {
                    let key = entry.key(self.key_length);
                    if let Some(last) = &last_key {
                        if self.compare(last, key) != Ordering::Less {
                            return Err(corrupt(format!("level {} out of order at {}", level, id)));
                        }
                    }
                    if level > 0 {
                        let child = self.page_values(p.children[i], level - 1)?;
                        let present = child
                            .iter()
                            .any(|t| self.compare(t.key(self.key_length), key) == Ordering::Equal);
                        if !present {
                            return Err(corrupt(format!(
                                "entry {} of {} at level {} points at a page without its key",
                                i, id, level
                            )));
                        }
                    }
                    last_key = Some(key.to_vec());
                }
                entries += values.len() as u64;
                prev = Some(id);
                page = p.next;
            }
            if prev != Some(bounds.tail) {
                return Err(corrupt(format!("level {} tail is not its last page", level)));
            }
            if level == 0 && entries != self.row_count {
                return Err(corrupt(format!(
                    "row count {} but leaf level holds {}",
                    self.row_count, entries
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for STree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("STree")
            .field("id", &self.id)
            .field("key_length", &self.key_length)
            .field("rows", &self.row_count)
            .field("height", &self.levels.len())
            .field("pages", &self.arena.len())
            .finish()
    }
}
