//! slabpool - A node-local page buffer manager.
//!
//! Pages are handed out as power-of-two mini-pages carved from a fixed pool
//! of full pages. A page is pinned while in use; its first unpin freezes its
//! size and, for a named page, fixes where it will live in its set's file.
//! Whole full pages are evicted in LRU order once none of their mini-pages
//! is pinned.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            slabpool                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Frontend (frontend/)                        │   │
//! │  │   get / return / freeze / pin / unpin wire requests      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Buffer (buffer/)                            │   │
//! │  │   BufferManager + Directory + PageHandle                 │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │ SlabAllocator: size classes, cursors, free slots │   │   │
//! │  │   │ LruReplacer over unpinned full pages            │   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage (storage/)                          │   │
//! │  │   DiskManager + set files + scratch file + metadata      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (SetId, PageKey, FullPageId, Error, config)
//! - [`buffer`] - Buffer manager, slab allocator and eviction
//! - [`storage`] - Set files, scratch file, metadata file
//! - [`frontend`] - Request/response layer over the buffer manager
//!
//! # Quick Start
//! ```
//! use slabpool::{BufferManager, BufferManagerConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = BufferManagerConfig::new(dir.path()).with_pages(4096, 8);
//! let manager = BufferManager::new(config).unwrap();
//!
//! // A scratch page of at least 100 bytes
//! let mut page = manager.get_anonymous_page_min(100).unwrap();
//! assert_eq!(page.capacity(), 128);
//! page.bytes_mut()[0] = 0xAB;
//! ```

pub mod buffer;
pub mod common;
pub mod frontend;
pub mod storage;

pub use common::logging::init_logging;
pub use common::{BufferManagerConfig, Error, FullPageId, PageKey, Result, SetId};

pub use buffer::{
    BufferManager, BufferManagerStats, PageBytes, PageBytesMut, PageHandle, PageStatus,
    StatsSnapshot,
};
pub use frontend::{BufferManagerFrontend, PageInfo, PageRef, Request, Response};
pub use storage::{DiskLocation, DiskManager};
