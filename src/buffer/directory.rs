//! Page directory - one entry per known page.
//!
//! The directory maps a [`PageKey`] to the shared [`PageInner`] every handle
//! of that page points at. The entry's [`Placement`] says where the bytes
//! are: in a mini-page, at a disk location, both, or nowhere yet.
//!
//! The directory mutex is held only for lookup-or-create; it is never held
//! while another lock is acquired. Per-page state has its own mutex, which
//! totally orders pin, freeze and placement transitions of one page. The
//! slot lock guards the page's bytes: byte views hold it, and a mini-page is
//! only taken away from a page under its write guard.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::buffer::slab::MiniPage;
use crate::common::PageKey;
use crate::storage::DiskLocation;

/// Where a page's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// No mini-page and no disk location.
    NotYetWritten,
    /// Only in memory.
    Resident(MiniPage),
    /// Only on disk.
    OnDisk(DiskLocation),
    /// In memory, with a location on disk.
    Both(MiniPage, DiskLocation),
}

impl Placement {
    #[inline]
    pub fn mini_page(&self) -> Option<MiniPage> {
        match *self {
            Placement::Resident(mini) | Placement::Both(mini, _) => Some(mini),
            Placement::NotYetWritten | Placement::OnDisk(_) => None,
        }
    }

    #[inline]
    pub fn location(&self) -> Option<DiskLocation> {
        match *self {
            Placement::OnDisk(location) | Placement::Both(_, location) => Some(location),
            Placement::NotYetWritten | Placement::Resident(_) => None,
        }
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.mini_page().is_some()
    }

    /// Same residency, with `location` recorded.
    pub fn with_location(self, location: DiskLocation) -> Self {
        match self.mini_page() {
            Some(mini) => Placement::Both(mini, location),
            None => Placement::OnDisk(location),
        }
    }
}

/// Mutable state of one page, behind [`PageInner::state`].
#[derive(Debug)]
pub struct PageState {
    pub placement: Placement,
    /// Live handles.
    pub refs: usize,
    pub pinned: bool,
    /// Set at the first unpin. From then on the bytes are read-only and the
    /// frozen size is final.
    pub unpinned_once: bool,
    pub frozen_size: Option<usize>,
    /// Bytes differ from what is on disk (or nothing is on disk).
    pub dirty: bool,
}

impl PageState {
    fn fresh() -> Self {
        Self {
            placement: Placement::NotYetWritten,
            refs: 0,
            pinned: false,
            unpinned_once: false,
            frozen_size: None,
            dirty: false,
        }
    }

    /// State of a committed page found in the metadata file.
    fn on_disk(location: DiskLocation) -> Self {
        Self {
            placement: Placement::OnDisk(location),
            refs: 0,
            pinned: false,
            unpinned_once: true,
            frozen_size: Some(location.len),
            dirty: false,
        }
    }

    /// Number of meaningful bytes: the frozen size, or the whole mini-page.
    pub fn used_len(&self) -> usize {
        match (self.frozen_size, self.placement) {
            (Some(len), _) => len,
            (None, placement) => placement
                .mini_page()
                .map(|mini| mini.capacity)
                .or_else(|| placement.location().map(|location| location.len))
                .unwrap_or(0),
        }
    }
}

/// Shared by every handle of one page.
#[derive(Debug)]
pub struct PageInner {
    pub key: PageKey,
    pub state: Mutex<PageState>,
    /// The mini-page holding the bytes, mirrored from the placement.
    /// Taken after `state` when both are held.
    pub slot: RwLock<Option<MiniPage>>,
}

impl PageInner {
    fn new(key: PageKey, state: PageState) -> Arc<Self> {
        Arc::new(Self {
            key,
            slot: RwLock::new(state.placement.mini_page()),
            state: Mutex::new(state),
        })
    }
}

/// All known pages.
#[derive(Debug, Default)]
pub struct Directory {
    pages: HashMap<PageKey, Arc<PageInner>>,
    next_anonymous: u64,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed committed named pages, e.g. from the metadata file.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = (PageKey, DiskLocation)>) {
        for (key, location) in entries {
            debug_assert!(!key.is_anonymous());
            let page = PageInner::new(key.clone(), PageState::on_disk(location));
            self.pages.insert(key, page);
        }
    }

    /// The entry for `key`, created in [`Placement::NotYetWritten`] if new.
    pub fn lookup_or_create(&mut self, key: PageKey) -> Arc<PageInner> {
        let page = self
            .pages
            .entry(key)
            .or_insert_with_key(|key| PageInner::new(key.clone(), PageState::fresh()));
        Arc::clone(page)
    }

    /// A new anonymous page with the next number.
    pub fn create_anonymous(&mut self) -> Arc<PageInner> {
        let key = PageKey::Anonymous(self.next_anonymous);
        self.next_anonymous += 1;
        self.lookup_or_create(key)
    }

    pub fn get(&self, key: &PageKey) -> Option<Arc<PageInner>> {
        self.pages.get(key).cloned()
    }

    pub fn remove(&mut self, key: &PageKey) -> Option<Arc<PageInner>> {
        self.pages.remove(key)
    }

    /// Every entry, for a pass that locks them one at a time.
    pub fn snapshot(&self) -> Vec<Arc<PageInner>> {
        self.pages.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
