//! LRU (Least Recently Used) replacement policy over full pages.
//!
//! Only full pages whose pinned-constituent count is zero are tracked. A full
//! page enters the replacer the instant its last pinned mini-page is
//! unpinned, stamped with the current tick, and leaves it as soon as any of
//! its mini-pages is pinned again.

use std::collections::{BTreeSet, HashMap};

use crate::common::FullPageId;

/// Recency-ordered set of evictable full pages.
///
/// The victim is the entry with the smallest tick; equal ticks fall back to
/// the smaller full page id.
pub struct LruReplacer {
    /// `(tick, full page)`, ordered oldest first.
    order: BTreeSet<(u64, FullPageId)>,

    /// Tick each tracked full page was stamped with.
    stamps: HashMap<FullPageId, u64>,
}

impl LruReplacer {
    /// Create an empty replacer.
    pub fn new() -> Self {
        Self {
            order: BTreeSet::new(),
            stamps: HashMap::new(),
        }
    }

    /// Mark a full page evictable as of `tick`.
    ///
    /// Re-inserting a tracked page moves it to the new tick.
    pub fn insert(&mut self, id: FullPageId, tick: u64) {
        if let Some(old) = self.stamps.insert(id, tick) {
            self.order.remove(&(old, id));
        }
        self.order.insert((tick, id));
    }

    /// Stop tracking a full page (it was pinned or returned to the free list).
    pub fn remove(&mut self, id: FullPageId) -> Option<u64> {
        let tick = self.stamps.remove(&id)?;
        self.order.remove(&(tick, id));
        Some(tick)
    }

    /// Select and remove the least recently used full page.
    ///
    /// Returns `None` if every full page is pinned.
    pub fn evict(&mut self) -> Option<FullPageId> {
        let (_, id) = self.order.pop_first()?;
        self.stamps.remove(&id);
        Some(id)
    }

    /// The page [`LruReplacer::evict`] would choose, without removing it.
    pub fn peek(&self) -> Option<FullPageId> {
        self.order.first().map(|&(_, id)| id)
    }

    /// The tick a tracked page was stamped with.
    pub fn stamp(&self, id: FullPageId) -> Option<u64> {
        self.stamps.get(&id).copied()
    }

    pub fn contains(&self, id: FullPageId) -> bool {
        self.stamps.contains_key(&id)
    }

    /// Number of evictable full pages.
    pub fn size(&self) -> usize {
        self.stamps.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(id: usize) -> FullPageId {
        FullPageId::new(id)
    }

    #[test]
    fn test_lru_basic() {
        let mut replacer = LruReplacer::new();

        replacer.insert(fp(2), 1);
        replacer.insert(fp(0), 2);
        replacer.insert(fp(1), 3);
        assert_eq!(replacer.size(), 3);

        // Oldest tick first, regardless of id
        assert_eq!(replacer.evict(), Some(fp(2)));
        assert_eq!(replacer.evict(), Some(fp(0)));
        assert_eq!(replacer.evict(), Some(fp(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_skips_pinned() {
        // A(tick=1, pinned=0), B(tick=2, pinned=1), C(tick=3, pinned=0):
        // B was removed when it was pinned, so A goes first and B never does.
        let mut replacer = LruReplacer::new();
        let (a, b, c) = (fp(0), fp(1), fp(2));

        replacer.insert(a, 1);
        replacer.insert(b, 2);
        replacer.insert(c, 3);
        replacer.remove(b);

        assert_eq!(replacer.evict(), Some(a));
        assert_eq!(replacer.evict(), Some(c));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_tie_break_by_id() {
        let mut replacer = LruReplacer::new();
        replacer.insert(fp(7), 5);
        replacer.insert(fp(3), 5);

        assert_eq!(replacer.peek(), Some(fp(3)));
        assert_eq!(replacer.evict(), Some(fp(3)));
        assert_eq!(replacer.evict(), Some(fp(7)));
    }

    #[test]
    fn test_lru_reinsert_moves_to_back() {
        let mut replacer = LruReplacer::new();
        replacer.insert(fp(0), 1);
        replacer.insert(fp(1), 2);

        // Full page 0 was pinned and unpinned again later.
        replacer.insert(fp(0), 3);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.stamp(fp(0)), Some(3));

        assert_eq!(replacer.evict(), Some(fp(1)));
        assert_eq!(replacer.evict(), Some(fp(0)));
    }

    #[test]
    fn test_lru_remove() {
        let mut replacer = LruReplacer::new();
        replacer.insert(fp(0), 1);
        replacer.insert(fp(1), 2);

        assert_eq!(replacer.remove(fp(0)), Some(1));
        assert_eq!(replacer.remove(fp(0)), None);
        assert!(!replacer.contains(fp(0)));

        assert_eq!(replacer.evict(), Some(fp(1)));
    }
}
