//! Tree pages and the arena that owns them.

use std::sync::Arc;
use strata_buffer::ManagedBatch;
use strata_common::{Result, StrataError, Tuple};

/// Handle of a page in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub u32);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Payload of a page: a small in-memory list, or a managed batch once the
/// page holds at least the configured threshold of entries.
pub enum PageValues {
    Resident(Vec<Tuple>),
    Managed { batch: Arc<dyn ManagedBatch>, len: usize },
}

impl PageValues {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            PageValues::Resident(values) => values.len(),
            PageValues::Managed { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, PageValues::Managed { .. })
    }
}

/// One node of a tree level.
///
/// Entries are sorted by key. Above level 0 each entry is a key tuple and
/// `children[i]` is the page one level down that contains `values[i]`'s key.
pub struct SPage {
    pub(crate) values: PageValues,
    pub(crate) children: Vec<PageId>,
    pub(crate) next: Option<PageId>,
    pub(crate) prev: Option<PageId>,
}

impl SPage {
    pub fn new() -> Self {
        Self {
            values: PageValues::Resident(Vec::new()),
            children: Vec::new(),
            next: None,
            prev: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn next(&self) -> Option<PageId> {
        self.next
    }

    #[inline]
    pub fn prev(&self) -> Option<PageId> {
        self.prev
    }

    /// Releases the managed batch, if any.
    pub(crate) fn release(self) {
        if let PageValues::Managed { batch, .. } = self.values {
            batch.remove();
        }
    }
}

impl Default for SPage {
    fn default() -> Self {
        Self::new()
    }
}

/// First and last page of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub head: PageId,
    pub tail: PageId,
}

/// Slab of pages addressed by `PageId`. Freed slots are reused.
#[derive(Default)]
pub struct PageArena {
    pages: Vec<Option<SPage>>,
    free: Vec<u32>,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a page and returns its handle.
    pub fn allocate(&mut self, page: SPage) -> PageId {
        match self.free.pop() {
            Some(slot) => {
                self.pages[slot as usize] = Some(page);
                PageId(slot)
            }
            None => {
                self.pages.push(Some(page));
                PageId(self.pages.len() as u32 - 1)
            }
        }
    }

    #[inline]
    pub fn get(&self, id: PageId) -> Result<&SPage> {
        self.pages
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StrataError::PageMissing(id.0))
    }

    #[inline]
    pub fn get_mut(&mut self, id: PageId) -> Result<&mut SPage> {
        self.pages
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StrataError::PageMissing(id.0))
    }

    /// Takes a page out of the arena.
    pub fn free(&mut self, id: PageId) -> Result<SPage> {
        let page = self
            .pages
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(StrataError::PageMissing(id.0))?;
        self.free.push(id.0);
        Ok(page)
    }

    /// Number of live pages.
    pub fn len(&self) -> usize {
        self.pages.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every live page out of the arena.
    pub fn drain(&mut self) -> Vec<SPage> {
        self.free.clear();
        self.pages.drain(..).flatten().collect()
    }
}
