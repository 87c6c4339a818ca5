//! Buffer management.
//!
//! The buffer layer owns a fixed pool of full pages and hands out
//! power-of-two mini-pages carved from them.
//!
//! # Components
//! - [`BufferManager`] - Get pages, flush, introspection
//! - [`PageHandle`] - Counted, pinnable reference to one page
//! - [`FullPage`] - A fixed-size block of the pool
//! - [`slab`] - Size classes and mini-page allocation
//! - [`replacer`] - LRU eviction over full pages
//! - [`BufferManagerStats`] - Performance statistics

mod buffer_manager;
mod directory;
mod full_page;
mod page_handle;
pub mod replacer;
pub mod slab;
mod stats;

pub use buffer_manager::BufferManager;
pub use directory::Placement;
pub use full_page::FullPage;
pub use page_handle::{PageBytes, PageBytesMut, PageHandle, PageStatus};
pub use slab::{MiniPage, SizeClasses};
pub use stats::{BufferManagerStats, StatsSnapshot};
