//! Buffer Manager - hands out mini-pages and moves them between memory and disk.
//!
//! The [`BufferManager`] provides:
//! - Named pages `(set, index)`, persisted in the set's file
//! - Anonymous pages, spilled to the scratch file only under memory pressure
//! - Pin-based residency with deferred disk placement
//! - LRU eviction of whole full pages

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::buffer::directory::{Directory, PageInner, PageState, Placement};
use crate::buffer::full_page::FullPage;
use crate::buffer::slab::{Allocation, MiniPage, SizeClasses, SlabAllocator};
use crate::buffer::{BufferManagerStats, PageHandle};
use crate::common::{BufferManagerConfig, Error, FullPageId, PageKey, Result, SetId};
use crate::storage::{DiskLocation, DiskManager, Metadata, PageLocation, SetMetadata};

/// State shared by the manager and every [`PageHandle`].
///
/// # Lock Order
/// ```text
/// page.state ─▶ slab
/// page.state ─▶ page.slot
/// page.state ─▶ page.state of an eviction victim's constituent
/// directory     (never held while taking another lock)
/// ```
/// Disk I/O happens with only the state and slot of the page being moved
/// held. Byte views hold nothing but their own page's slot lock.
pub(crate) struct Shared {
    pub(crate) config: BufferManagerConfig,
    pub(crate) classes: SizeClasses,
    full_pages: Vec<FullPage>,
    slab: Mutex<SlabAllocator>,
    /// Signalled whenever a reclaim finishes or is aborted.
    reclaimed: Condvar,
    directory: Mutex<Directory>,
    disk: DiskManager,
    stats: BufferManagerStats,
}

/// Node-local page manager.
///
/// Cloning is cheap; clones share one pool.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                        BufferManager                         │
/// │  ┌──────────────┐   ┌─────────────────────────────────────┐  │
/// │  │  directory   │   │      full_pages: Vec<FullPage>      │  │
/// │  │ PageKey → ◆  │──▶│ [FP0: 8 8 8 ..] [FP1: 4096] ...     │  │
/// │  └──────────────┘   └─────────────────────────────────────┘  │
/// │  ┌──────────────────────────────┐  ┌──────────────────────┐  │
/// │  │ slab: size classes, cursors, │  │ disk: set files +    │  │
/// │  │ free slots, LruReplacer      │  │ scratch file         │  │
/// │  └──────────────────────────────┘  └──────────────────────┘  │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Usage
/// ```
/// use slabpool::{BufferManager, BufferManagerConfig, SetId};
///
/// let dir = tempfile::tempdir().unwrap();
/// let manager = BufferManager::new(BufferManagerConfig::new(dir.path())).unwrap();
/// let set = SetId::new("db", "employees");
///
/// let mut page = manager.get_page(&set, 0).unwrap();
/// page.bytes_mut()[..4].copy_from_slice(b"AAAA");
/// page.freeze_size(4);
/// page.unpin();
/// drop(page);
///
/// let page = manager.get_page(&set, 0).unwrap();
/// assert_eq!(&*page.bytes(), b"AAAA");
/// ```
#[derive(Clone)]
pub struct BufferManager {
    shared: Arc<Shared>,
}

impl BufferManager {
    /// Create a buffer manager.
    ///
    /// Loads the metadata file if present, and truncates the scratch file.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration fails validation
    /// - `Error::CorruptMetadata` if the metadata file cannot be decoded
    /// - `Error::Io` if the storage root or scratch file cannot be created
    pub fn new(config: BufferManagerConfig) -> Result<Self> {
        config.validate()?;

        let metadata_path = config.metadata_path();
        let metadata = Metadata::load(&metadata_path)?.unwrap_or_default();
        if let Some((set, page)) = metadata.sets.iter().find_map(|set| {
            set.pages
                .iter()
                .find(|page| page.len > config.page_size as u64)
                .map(|page| (&set.set, page))
        }) {
            return Err(Error::CorruptMetadata {
                path: metadata_path,
                reason: format!(
                    "page {} of {} is {} bytes, page size is {}",
                    page.index, set, page.len, config.page_size
                ),
            });
        }
        let disk = DiskManager::new(
            &config.storage_root,
            config.scratch_path(),
            metadata
                .sets
                .iter()
                .map(|set| (set.set.clone(), set.end_of_file)),
        )?;

        let mut directory = Directory::new();
        directory.restore(metadata.sets.iter().flat_map(|set| {
            set.pages.iter().map(move |page| {
                (
                    PageKey::named(set.set.clone(), page.index),
                    DiskLocation::new(page.offset, page.len as usize),
                )
            })
        }));

        let num_full_pages = config.num_full_pages();
        let classes = SizeClasses::new(config.min_page_size, config.page_size);
        info!(
            root = %config.storage_root.display(),
            page_size = config.page_size,
            full_pages = num_full_pages,
            size_classes = classes.count(),
            restored_pages = directory.len(),
            "buffer_manager.start"
        );

        let shared = Shared {
            full_pages: (0..num_full_pages)
                .map(|_| FullPage::new(config.page_size))
                .collect(),
            slab: Mutex::new(SlabAllocator::new(
                classes,
                config.page_size,
                num_full_pages,
            )),
            reclaimed: Condvar::new(),
            directory: Mutex::new(directory),
            disk,
            stats: BufferManagerStats::new(),
            classes,
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    // ========================================================================
    // Public API: Get pages
    // ========================================================================

    /// Get page `index` of `set`, pinned.
    ///
    /// A page seen before comes back with its bytes (loaded from disk if it
    /// was evicted); a new page gets a full-page-sized mini-page with
    /// unspecified contents.
    ///
    /// # Errors
    /// - `Error::Io` if the set file cannot be opened or read
    /// - `Error::ResourceExhausted` if every full page is pinned
    pub fn get_page(&self, set: &SetId, index: u64) -> Result<PageHandle> {
        self.shared.disk.open_set(set)?;
        let page = self
            .shared
            .directory
            .lock()
            .lookup_or_create(PageKey::named(set.clone(), index));
        PageHandle::acquire(Arc::clone(&self.shared), page, self.shared.classes.largest())
    }

    /// Get a new anonymous page of the full page size.
    pub fn get_anonymous_page(&self) -> Result<PageHandle> {
        self.get_anonymous_page_min(self.shared.config.page_size)
    }

    /// Get a new anonymous page of at least `min_bytes`.
    ///
    /// The capacity is the smallest size class that fits.
    ///
    /// # Panics
    /// Panics if `min_bytes` exceeds the page size.
    pub fn get_anonymous_page_min(&self, min_bytes: usize) -> Result<PageHandle> {
        let class = self.shared.classes.class_for(min_bytes);
        let page = self.shared.directory.lock().create_anonymous();
        PageHandle::acquire(Arc::clone(&self.shared), page, class)
    }

    // ========================================================================
    // Public API: Persistence
    // ========================================================================

    /// Write every committed, dirty named page to its set file, sync the set
    /// files, and store the metadata file.
    pub fn flush_all(&self) -> Result<()> {
        self.shared.flush_all()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    pub fn config(&self) -> &BufferManagerConfig {
        &self.shared.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.shared.config.page_size
    }

    #[inline]
    pub fn num_full_pages(&self) -> usize {
        self.shared.full_pages.len()
    }

    #[inline]
    pub fn size_class_count(&self) -> usize {
        self.shared.classes.count()
    }

    /// Full pages not carved into any size class.
    pub fn free_full_pages(&self) -> usize {
        self.shared.slab.lock().free_full_pages()
    }

    /// Full pages with no pinned mini-page.
    pub fn evictable_full_pages(&self) -> usize {
        self.shared.slab.lock().evictable_full_pages()
    }

    /// Pinned mini-pages on full page `id`.
    pub fn pinned_count(&self, id: FullPageId) -> u32 {
        self.shared.slab.lock().pinned_count(id)
    }

    /// The full page the next eviction would reclaim.
    pub fn next_victim(&self) -> Option<FullPageId> {
        self.shared.slab.lock().next_victim()
    }

    /// Known pages, resident or not.
    pub fn page_count(&self) -> usize {
        self.shared.directory.lock().len()
    }

    /// End of `set`'s file: where the next committed page will go.
    pub fn set_end_of_file(&self, set: &SetId) -> Option<u64> {
        self.shared.disk.end_of_file(set)
    }

    /// Bytes of the scratch file handed out to spilled pages so far.
    pub fn scratch_len(&self) -> u64 {
        self.shared.disk.scratch_len()
    }

    #[inline]
    pub fn stats(&self) -> &BufferManagerStats {
        &self.shared.stats
    }
}

impl Shared {
    #[inline]
    pub(crate) fn full_page(&self, id: FullPageId) -> &FullPage {
        &self.full_pages[id.0]
    }

    // ========================================================================
    // Pin / unpin
    // ========================================================================

    /// Make `page` resident and pinned.
    ///
    /// `fresh_class` sizes the mini-page of a page that has no bytes yet.
    pub(crate) fn pin(&self, page: &PageInner, fresh_class: usize) -> Result<()> {
        loop {
            let mut state = page.state.lock();
            if state.pinned {
                BufferManagerStats::bump(&self.stats.cache_hits);
                return Ok(());
            }

            let placement = state.placement;
            match placement {
                Placement::Resident(mini) | Placement::Both(mini, _) => {
                    let mut slab = self.slab.lock();
                    if slab.pin(mini) {
                        state.pinned = true;
                        BufferManagerStats::bump(&self.stats.cache_hits);
                        return Ok(());
                    }

                    // The full page is being reclaimed; once that finishes
                    // this page is on disk.
                    drop(state);
                    trace!(page = %page.key, full_page = %mini.full_page, "buffer_manager.wait_reclaim");
                    self.reclaimed
                        .wait_while(&mut slab, |slab| slab.is_reclaiming(mini.full_page));
                }
                Placement::OnDisk(location) => {
                    return self.load(page, &mut state, location);
                }
                Placement::NotYetWritten => {
                    let mini = self.allocate(fresh_class, &page.key)?;
                    state.placement = Placement::Resident(mini);
                    state.pinned = true;
                    state.dirty = true;
                    *page.slot.write() = Some(mini);
                    trace!(page = %page.key, full_page = %mini.full_page, offset = mini.offset, "buffer_manager.create");
                    return Ok(());
                }
            }
        }
    }

    /// Read a page back from `location` into a new mini-page.
    fn load(&self, page: &PageInner, state: &mut PageState, location: DiskLocation) -> Result<()> {
        let mut buf = vec![0u8; location.len];
        self.disk.read_page(&page.key, location, &mut buf)?;
        BufferManagerStats::bump(&self.stats.pages_read);

        let class = self.classes.class_for(location.len);
        let mini = self.allocate(class, &page.key)?;
        // SAFETY: the slot was just allocated to this page and no view can
        // reach it until `page.slot` is set below.
        unsafe { self.full_page(mini.full_page).slice_mut(mini.range(location.len)) }
            .copy_from_slice(&buf);
        *page.slot.write() = Some(mini);

        state.placement = Placement::Both(mini, location);
        state.pinned = true;
        state.dirty = false;
        BufferManagerStats::bump(&self.stats.cache_misses);
        debug!(
            page = %page.key,
            full_page = %mini.full_page,
            offset = location.offset,
            len = location.len,
            "buffer_manager.load"
        );
        Ok(())
    }

    /// Unpin `page`. Idempotent.
    pub(crate) fn unpin(&self, page: &PageInner) {
        let mut state = page.state.lock();
        self.unpin_locked(&page.key, &mut state);
    }

    fn unpin_locked(&self, key: &PageKey, state: &mut PageState) {
        if !state.pinned {
            return;
        }
        let Some(mini) = state.placement.mini_page() else {
            panic!("invariant violation: pinned {} is not resident", key);
        };

        if !state.unpinned_once {
            state.unpinned_once = true;
            let len = *state.frozen_size.get_or_insert(mini.capacity);
            if let (PageKey::Named { set, .. }, None) = (key, state.placement.location()) {
                let location = self.disk.reserve(set, len);
                state.placement = Placement::Both(mini, location);
                debug!(page = %key, offset = location.offset, len, "buffer_manager.commit_location");
            }
        }

        state.pinned = false;
        self.slab.lock().unpin(mini);
    }

    /// Drop one handle reference. The last reference of an anonymous page
    /// frees its slot and scratch range; the last reference of a named page
    /// only unpins it.
    pub(crate) fn release(&self, page: &PageInner) {
        let mut state = page.state.lock();
        state.refs -= 1;
        if state.refs > 0 {
            return;
        }

        if !page.key.is_anonymous() {
            self.unpin_locked(&page.key, &mut state);
            return;
        }

        if let Some(mini) = state.placement.mini_page() {
            self.slab.lock().release(mini, &page.key, state.pinned);
        }
        if let Some(location) = state.placement.location() {
            let capacity = self.classes.capacity(self.classes.class_for(location.len));
            self.disk.release_scratch(location, capacity);
        }
        state.placement = Placement::NotYetWritten;
        state.pinned = false;
        *page.slot.write() = None;
        drop(state);

        self.directory.lock().remove(&page.key);
        trace!(page = %page.key, "buffer_manager.release");
    }

    // ========================================================================
    // Allocation and eviction
    // ========================================================================

    /// Get a pinned slot of `class` for `key`, evicting if needed.
    fn allocate(&self, class: usize, key: &PageKey) -> Result<MiniPage> {
        let step = self.slab.lock().allocate(class, key);
        match step {
            Allocation::Slot(mini) => Ok(mini),
            Allocation::Exhausted => {
                let requested = self.classes.capacity(class);
                warn!(page = %key, requested, "buffer_manager.exhausted");
                Err(Error::ResourceExhausted { requested })
            }
            Allocation::Evict {
                victim,
                constituents,
            } => {
                debug!(
                    full_page = %victim,
                    constituents = constituents.len(),
                    for_page = %key,
                    "buffer_manager.evict"
                );
                for constituent in &constituents {
                    if let Err(e) = self.evict_constituent(victim, constituent) {
                        warn!(full_page = %victim, page = %constituent, error = %e, "buffer_manager.evict_failed");
                        self.slab.lock().abort_reclaim(victim);
                        self.reclaimed.notify_all();
                        return Err(e);
                    }
                }

                let mini = self.slab.lock().finish_reclaim(victim, class, key);
                self.reclaimed.notify_all();
                BufferManagerStats::bump(&self.stats.evictions);
                Ok(mini)
            }
        }
    }

    /// Move one constituent of `victim` out of memory, writing it first if
    /// it is dirty.
    fn evict_constituent(&self, victim: FullPageId, key: &PageKey) -> Result<()> {
        let Some(page) = self.directory.lock().get(key) else {
            return Ok(());
        };
        let mut state = page.state.lock();
        let mini = match state.placement.mini_page() {
            Some(mini) if mini.full_page == victim => mini,
            // Released while the eviction was starting.
            _ => return Ok(()),
        };
        assert!(
            !state.pinned,
            "invariant violation: pinned {} on reclaimed {}",
            key, victim
        );

        // Waits out any view still held through another handle.
        let mut slot = page.slot.write();
        let location = if state.dirty {
            self.write_back(key, &mut state, mini)?
        } else {
            match state.placement.location() {
                Some(location) => location,
                None => panic!("invariant violation: clean {} has no disk location", key),
            }
        };

        *slot = None;
        drop(slot);
        state.placement = Placement::OnDisk(location);
        self.slab.lock().detach(mini, key);
        trace!(page = %key, full_page = %victim, "buffer_manager.evicted");
        Ok(())
    }

    /// Write a dirty resident page to disk: a named page to its committed
    /// location, an anonymous page to a new scratch range.
    ///
    /// The caller holds the page's slot lock.
    fn write_back(&self, key: &PageKey, state: &mut PageState, mini: MiniPage) -> Result<DiskLocation> {
        let len = state.used_len();
        // SAFETY: the caller's slot guard excludes write views of `mini`.
        let bytes = unsafe { self.full_page(mini.full_page).slice(mini.range(len)) }.to_vec();

        let location = match (key, state.placement.location()) {
            (_, Some(location)) => {
                self.disk.write_page(key, location, &bytes)?;
                BufferManagerStats::bump(&self.stats.pages_written);
                location
            }
            (PageKey::Anonymous(_), None) => {
                let capacity = self.classes.capacity(self.classes.class_for(len));
                let location = self.disk.allocate_scratch(len, capacity);
                if let Err(e) = self.disk.write_page(key, location, &bytes) {
                    self.disk.release_scratch(location, capacity);
                    return Err(e);
                }
                BufferManagerStats::bump(&self.stats.spills);
                debug!(page = %key, offset = location.offset, len, "buffer_manager.spill");
                location
            }
            (PageKey::Named { .. }, None) => {
                panic!("invariant violation: unpinned {} has no committed location", key)
            }
        };

        state.dirty = false;
        Ok(location)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn flush_all(&self) -> Result<()> {
        let pages = self.directory.lock().snapshot();
        let mut committed: BTreeMap<SetId, Vec<PageLocation>> = BTreeMap::new();

        for page in &pages {
            let PageKey::Named { set, index } = &page.key else {
                continue;
            };
            let mut state = page.state.lock();
            let Some(location) = state.placement.location() else {
                continue;
            };
            if state.dirty {
                if let Some(mini) = state.placement.mini_page() {
                    let _slot = page.slot.read();
                    self.write_back(&page.key, &mut state, mini)?;
                }
            }
            committed.entry(set.clone()).or_default().push(PageLocation {
                index: *index,
                offset: location.offset,
                len: location.len as u64,
            });
        }

        self.disk.sync_sets()?;

        let sets = self
            .disk
            .set_ends()
            .into_iter()
            .map(|(set, end_of_file)| {
                let mut pages = committed.remove(&set).unwrap_or_default();
                pages.sort_by_key(|page| page.index);
                SetMetadata {
                    set,
                    end_of_file,
                    pages,
                }
            })
            .collect();
        let metadata = Metadata { sets };
        metadata.store(&self.config.metadata_path())?;

        debug!(
            sets = metadata.sets.len(),
            pages = metadata.sets.iter().map(|set| set.pages.len()).sum::<usize>(),
            "buffer_manager.flush_all"
        );
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!(error = %e, "buffer_manager.shutdown_flush_failed");
        }
        if let Err(e) = self.disk.remove_scratch() {
            warn!(error = %e, "buffer_manager.remove_scratch_failed");
        }
        info!(stats = %self.stats.snapshot(), "buffer_manager.shutdown");
    }
}
