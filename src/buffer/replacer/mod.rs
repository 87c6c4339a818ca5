//! Eviction policy (replacer).
//!
//! Currently implements:
//! - [`LruReplacer`] - Least recently unpinned full page first, ties by id

mod lru;

pub use lru::LruReplacer;
