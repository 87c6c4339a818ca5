//! Page handles and byte views.
//!
//! A [`PageHandle`] is a counted reference to one page:
//! - Getting a page pins it; [`PageHandle::unpin`] and [`PageHandle::repin`]
//!   toggle residency guarantees afterwards
//! - [`PageHandle::bytes`] / [`PageHandle::bytes_mut`] borrow the bytes while
//!   the page is pinned
//! - Dropping the last handle of an anonymous page frees its slot
//!
//! A byte view holds only its own page's slot lock. Views of different
//! pages never block each other, even on the same full page. A page whose
//! pin was released through another handle cannot be evicted until views
//! of it are dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::buffer_manager::Shared;
use crate::buffer::directory::{PageInner, PageState};
use crate::buffer::slab::MiniPage;
use crate::common::{PageKey, Result};
use crate::storage::DiskLocation;

/// A point-in-time view of a page's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStatus {
    pub pinned: bool,
    pub dirty: bool,
    pub resident: bool,
    /// The page has been unpinned at least once; its bytes are read-only.
    pub was_unpinned: bool,
    pub frozen_size: Option<usize>,
    pub mini_page: Option<MiniPage>,
    pub location: Option<DiskLocation>,
}

/// Counted reference to a page.
///
/// Cloning adds a reference; the page is destroyed (anonymous) or left
/// evictable (named) when the last one is dropped.
pub struct PageHandle {
    page: Arc<PageInner>,
    shared: Arc<Shared>,
}

impl PageHandle {
    /// Take a new reference to `page` and pin it.
    ///
    /// On failure the reference is dropped again, which cleans up a page
    /// that never got any bytes.
    pub(crate) fn acquire(shared: Arc<Shared>, page: Arc<PageInner>, class: usize) -> Result<Self> {
        page.state.lock().refs += 1;
        let handle = Self { page, shared };
        handle.shared.pin(&handle.page, class)?;
        Ok(handle)
    }

    #[inline]
    pub fn key(&self) -> &PageKey {
        &self.page.key
    }

    pub fn status(&self) -> PageStatus {
        let state = self.page.state.lock();
        PageStatus {
            pinned: state.pinned,
            dirty: state.dirty,
            resident: state.placement.is_resident(),
            was_unpinned: state.unpinned_once,
            frozen_size: state.frozen_size,
            mini_page: state.placement.mini_page(),
            location: state.placement.location(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.page.state.lock().pinned
    }

    /// Bytes available to the page: the capacity of its size class.
    pub fn capacity(&self) -> usize {
        let state = self.page.state.lock();
        match state.placement.mini_page() {
            Some(mini) => mini.capacity,
            None => {
                let classes = self.shared.classes;
                classes.capacity(classes.class_for(state.used_len()))
            }
        }
    }

    /// Bytes in use: the frozen size, or the capacity if not frozen.
    pub fn len(&self) -> usize {
        self.page.state.lock().used_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the page's bytes.
    ///
    /// # Panics
    /// Panics if the page is not pinned.
    pub fn bytes(&self) -> PageBytes<'_> {
        let len = {
            let state = self.page.state.lock();
            self.pinned_mini_page(&state, "bytes");
            state.used_len()
        };
        let slot = self.page.slot.read();
        let mini = self.resident_slot(*slot, "bytes");
        // SAFETY: write views of this slot need the write guard of `slot`,
        // and the mini-page stays with this page while `slot` is held.
        let bytes = unsafe { self.shared.full_page(mini.full_page).slice(mini.range(len)) };
        PageBytes { _slot: slot, bytes }
    }

    /// Write the page's bytes.
    ///
    /// # Panics
    /// Panics if the page is not pinned, or has been unpinned before.
    pub fn bytes_mut(&mut self) -> PageBytesMut<'_> {
        let len = {
            let state = self.page.state.lock();
            self.pinned_mini_page(&state, "bytes_mut");
            assert!(
                !state.unpinned_once,
                "contract violation: {} is read-only after its first unpin",
                self.page.key
            );
            state.used_len()
        };
        let slot = self.page.slot.write();
        let mini = self.resident_slot(*slot, "bytes_mut");
        // SAFETY: the write guard of `slot` excludes every other view of
        // this slot, and other pages' slots never overlap it.
        let bytes = unsafe { self.shared.full_page(mini.full_page).slice_mut(mini.range(len)) };
        PageBytesMut { _slot: slot, bytes }
    }

    /// The mini-page a view was asked for. `None` means another handle
    /// unpinned the page and it was evicted in the meantime.
    fn resident_slot(&self, slot: Option<MiniPage>, op: &str) -> MiniPage {
        match slot {
            Some(mini) => mini,
            None => panic!("contract violation: {}() on unpinned {}", op, self.page.key),
        }
    }

    fn pinned_mini_page(&self, state: &MutexGuard<'_, PageState>, op: &str) -> MiniPage {
        assert!(
            state.pinned,
            "contract violation: {}() on unpinned {}",
            op, self.page.key
        );
        match state.placement.mini_page() {
            Some(mini) => mini,
            None => panic!("invariant violation: pinned {} is not resident", self.page.key),
        }
    }

    /// Fix the number of bytes in use. May be called again until the first
    /// unpin; the last value wins.
    ///
    /// # Panics
    /// Panics if the page has been unpinned, or `len` exceeds its capacity.
    pub fn freeze_size(&mut self, len: usize) {
        let mut state = self.page.state.lock();
        assert!(
            !state.unpinned_once,
            "contract violation: freeze_size({}) on {} after it was unpinned",
            len, self.page.key
        );
        let mini = self.pinned_mini_page(&state, "freeze_size");
        assert!(
            len <= mini.capacity,
            "contract violation: freeze_size({}) exceeds the {}-byte capacity of {}",
            len,
            mini.capacity,
            self.page.key
        );
        state.frozen_size = Some(len);
    }

    /// Release the pin. Idempotent.
    ///
    /// The first unpin fixes the size (the whole capacity if
    /// [`PageHandle::freeze_size`] was never called) and, for a named page,
    /// reserves its place at the end of the set's file.
    pub fn unpin(&mut self) {
        self.shared.unpin(&self.page);
    }

    /// Pin again, loading the bytes back from disk if the page was evicted.
    ///
    /// # Errors
    /// - `Error::Io` if the page cannot be read back
    /// - `Error::ResourceExhausted` if no mini-page can be found for it
    pub fn repin(&mut self) -> Result<()> {
        self.shared.pin(&self.page, self.shared.classes.largest())
    }
}

impl Clone for PageHandle {
    fn clone(&self) -> Self {
        self.page.state.lock().refs += 1;
        Self {
            page: Arc::clone(&self.page),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.shared.release(&self.page);
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("key", &self.page.key)
            .field("status", &self.status())
            .finish()
    }
}

/// Shared view of a pinned page's bytes.
pub struct PageBytes<'a> {
    _slot: RwLockReadGuard<'a, Option<MiniPage>>,
    bytes: &'a [u8],
}

impl Deref for PageBytes<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

/// Exclusive view of a pinned, never-unpinned page's bytes.
pub struct PageBytesMut<'a> {
    _slot: RwLockWriteGuard<'a, Option<MiniPage>>,
    bytes: &'a mut [u8],
}

impl Deref for PageBytesMut<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &*self.bytes
    }
}

impl DerefMut for PageBytesMut<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }
}

#[cfg(test)]
mod tests {
    use crate::{BufferManager, BufferManagerConfig, SetId};
    use tempfile::{tempdir, TempDir};

    fn create_manager() -> (TempDir, BufferManager) {
        let dir = tempdir().unwrap();
        let config = BufferManagerConfig::new(dir.path()).with_pages(64, 4);
        let manager = BufferManager::new(config).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_freeze_size_shrinks_view() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page().unwrap();

        assert_eq!(page.len(), 64);
        page.freeze_size(10);
        assert_eq!(page.len(), 10);
        assert_eq!(page.bytes().len(), 10);
        assert_eq!(page.capacity(), 64);

        // Last value wins until the first unpin.
        page.freeze_size(12);
        page.unpin();
        assert_eq!(page.status().frozen_size, Some(12));
    }

    #[test]
    #[should_panic(expected = "contract violation: freeze_size")]
    fn test_freeze_after_unpin_panics() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page().unwrap();
        page.unpin();
        page.freeze_size(4);
    }

    #[test]
    #[should_panic(expected = "exceeds the 8-byte capacity")]
    fn test_freeze_beyond_capacity_panics() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page_min(8).unwrap();
        page.freeze_size(9);
    }

    #[test]
    #[should_panic(expected = "contract violation: bytes() on unpinned")]
    fn test_bytes_of_unpinned_page_panics() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page().unwrap();
        page.unpin();
        let _ = page.bytes();
    }

    #[test]
    #[should_panic(expected = "read-only after its first unpin")]
    fn test_bytes_mut_after_repin_panics() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page().unwrap();
        page.unpin();
        page.repin().unwrap();
        let _ = page.bytes_mut();
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let (_dir, manager) = create_manager();
        let set = SetId::new("db", "s");
        let mut page = manager.get_page(&set, 0).unwrap();
        page.freeze_size(4);

        page.unpin();
        let once = page.status();
        let end_once = manager.set_end_of_file(&set);

        page.unpin();
        assert_eq!(page.status(), once);
        assert_eq!(manager.set_end_of_file(&set), end_once);
        assert_eq!(manager.evictable_full_pages(), 1);
    }

    #[test]
    fn test_clone_keeps_anonymous_page_alive() {
        let (_dir, manager) = create_manager();
        let mut page = manager.get_anonymous_page_min(8).unwrap();
        page.bytes_mut().copy_from_slice(b"12345678");

        let copy = page.clone();
        drop(page);

        assert_eq!(manager.page_count(), 1);
        assert_eq!(&*copy.bytes(), b"12345678");
        drop(copy);
        assert_eq!(manager.page_count(), 0);
    }

    #[test]
    fn test_views_on_one_full_page_do_not_block() {
        let (_dir, manager) = create_manager();
        let mut a = manager.get_anonymous_page_min(8).unwrap();
        let mut b = manager.get_anonymous_page_min(8).unwrap();
        assert_eq!(
            a.status().mini_page.unwrap().full_page,
            b.status().mini_page.unwrap().full_page
        );

        a.bytes_mut().copy_from_slice(b"aaaaaaaa");
        let read_a = a.bytes();
        let mut write_b = b.bytes_mut();
        write_b.copy_from_slice(b"bbbbbbbb");

        assert_eq!(&*read_a, b"aaaaaaaa");
        assert_eq!(&*write_b, b"bbbbbbbb");
    }

    #[test]
    fn test_view_held_while_neighbour_reloads() {
        let dir = tempdir().unwrap();
        let config = BufferManagerConfig::new(dir.path())
            .with_pages(64, 2)
            .with_min_page_size(8);
        let manager = BufferManager::new(config).unwrap();
        let set = SetId::new("db", "s");

        let mut keep = manager.get_anonymous_page_min(8).unwrap();
        keep.bytes_mut().copy_from_slice(b"keeping!");
        let mut page = manager.get_page(&set, 0).unwrap();
        page.bytes_mut()[..8].copy_from_slice(b"reloaded");
        page.freeze_size(8);
        page.unpin();

        // Evicts `page`: the only unpinned full page.
        drop(manager.get_anonymous_page().unwrap());
        assert!(!page.status().resident);

        let view = keep.bytes();
        page.repin().unwrap();
        assert_eq!(
            page.status().mini_page.unwrap().full_page,
            keep.status().mini_page.unwrap().full_page
        );
        assert_eq!(&*page.bytes(), b"reloaded");
        assert_eq!(&*view, b"keeping!");
    }

    #[test]
    fn test_debug_format() {
        let (_dir, manager) = create_manager();
        let page = manager.get_anonymous_page().unwrap();
        let debug = format!("{:?}", page);
        assert!(debug.contains("Anonymous(0)"));
        assert!(debug.contains("pinned: true"));
    }
}
