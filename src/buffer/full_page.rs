//! Full Page - a fixed-size block of the memory pool.
//!
//! A [`FullPage`] holds the raw bytes that mini-pages are carved from.
//! [`FullPageMeta`] holds the bookkeeping the slab allocator keeps for it:
//! - Which size class it is currently carved into (if any)
//! - Which mini-pages live on it
//! - How many of those are pinned, and when it was last used

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::ops::Range;
use std::slice;

use crate::buffer::slab::MiniPage;
use crate::common::PageKey;

/// The bytes of one full page.
///
/// # Thread Safety
/// There is no lock over the whole page. Each mini-page carved from it is
/// accessed only by the page that owns the slot, under that page's slot
/// lock. Slots of one full page never overlap, so views of neighbouring
/// mini-pages do not contend.
pub struct FullPage {
    data: Box<[UnsafeCell<u8>]>,
}

// SAFETY: every access goes through `slice`/`slice_mut`, whose callers hold
// the owning page's slot lock for the range they touch.
unsafe impl Send for FullPage {}
unsafe impl Sync for FullPage {}

impl FullPage {
    /// Allocate a zeroed full page of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: (0..size).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    /// Shared view of `range`.
    ///
    /// # Safety
    /// No `&mut` to any byte of `range` may exist while the returned slice
    /// is alive. Holding a read guard on the slot lock of the page that owns
    /// `range` guarantees this.
    #[inline]
    pub(crate) unsafe fn slice(&self, range: Range<usize>) -> &[u8] {
        let cells = &self.data[range];
        slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }

    /// Exclusive view of `range`.
    ///
    /// # Safety
    /// No other reference to any byte of `range` may exist while the
    /// returned slice is alive. Holding the write guard on the slot lock of
    /// the page that owns `range`, or owning a slot not yet published to any
    /// page, guarantees this.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [u8] {
        let cells = &self.data[range];
        slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Allocator-side state of a full page. Always accessed under the slab lock.
#[derive(Debug, Default)]
pub struct FullPageMeta {
    /// Size class the page is carved into; `None` while on the empty list.
    pub size_class: Option<usize>,

    /// Mini-pages currently occupying this page.
    pub constituents: HashSet<PageKey>,

    /// Number of constituents that are pinned.
    pub pinned: u32,

    /// Tick at which `pinned` last dropped to zero; `None` while pinned.
    pub last_used: Option<u64>,

    /// Set while an eviction is writing the constituents out. A reclaiming
    /// page cannot be pinned or carved.
    pub reclaiming: bool,

    /// Slots vacated since the reclaim began; handed back to the size class
    /// if the reclaim is aborted.
    pub released: Vec<MiniPage>,
}

impl FullPageMeta {
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned > 0
    }

    /// Forget the size class and every constituent.
    pub fn reset(&mut self) {
        self.size_class = None;
        self.constituents.clear();
        self.last_used = None;
        self.reclaiming = false;
        self.released.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_page_new() {
        let page = FullPage::new(64);
        assert_eq!(page.size(), 64);
        assert!(unsafe { page.slice(0..64) }.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_page_disjoint_ranges() {
        let page = FullPage::new(64);

        let (one, two) = unsafe { (page.slice_mut(8..16), page.slice_mut(16..24)) };
        one.copy_from_slice(b"mini#one");
        two.copy_from_slice(b"mini#two");

        assert_eq!(unsafe { page.slice(8..16) }, b"mini#one");
        assert_eq!(unsafe { page.slice(16..24) }, b"mini#two");
        assert_eq!(unsafe { page.slice(0..8) }.len(), 8);
    }

    #[test]
    fn test_full_page_concurrent_slots() {
        use std::sync::Arc;
        use std::thread;

        let page = Arc::new(FullPage::new(64));

        let mut handles = vec![];
        for i in 0..8u8 {
            let page = Arc::clone(&page);
            handles.push(thread::spawn(move || {
                let range = i as usize * 8..(i as usize + 1) * 8;
                unsafe { page.slice_mut(range.clone()) }.fill(i);
                assert!(unsafe { page.slice(range) }.iter().all(|&b| b == i));
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_meta_reset() {
        let mut meta = FullPageMeta {
            size_class: Some(2),
            last_used: Some(7),
            reclaiming: true,
            ..Default::default()
        };
        meta.constituents.insert(PageKey::Anonymous(1));

        meta.reset();

        assert_eq!(meta.size_class, None);
        assert!(meta.constituents.is_empty());
        assert_eq!(meta.last_used, None);
        assert!(!meta.reclaiming);
        assert!(!meta.is_pinned());
    }
}
