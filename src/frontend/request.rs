//! Wire-level request and response types.
//!
//! One [`Request`] variant per operation a remote caller can ask for. They
//! map 1:1 onto the [`crate::BufferManager`] / [`crate::PageHandle`] API.

use serde::{Deserialize, Serialize};

use crate::buffer::PageHandle;
use crate::common::PageKey;

/// Identifies a page a caller already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageRef {
    Named {
        database: String,
        set: String,
        page: u64,
    },
    Anonymous {
        page: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetPage {
        database: String,
        set: String,
        page: u64,
    },
    /// `min_bytes: None` asks for a full page.
    GetAnonymousPage {
        min_bytes: Option<usize>,
    },
    ReturnPage {
        database: String,
        set: String,
        page: u64,
    },
    ReturnAnonymousPage {
        page: u64,
    },
    FreezeSize {
        page: PageRef,
        bytes: usize,
    },
    PinPage {
        page: PageRef,
    },
    UnpinPage {
        page: PageRef,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "body", rename_all = "snake_case")]
pub enum Response {
    Page(PageInfo),
    Ok,
    Error(String),
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

/// Everything a remote caller needs to find a page's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Full page holding the bytes, if resident.
    pub full_page: Option<usize>,
    /// Offset within the full page, if resident.
    pub offset: Option<usize>,
    pub pinned: bool,
    pub dirty: bool,
    pub page_num: u64,
    pub is_anonymous: bool,
    pub size_frozen: bool,
    /// Offset in the set or scratch file, once the page has one.
    pub start_pos: Option<u64>,
    pub num_bytes: usize,
    pub database: Option<String>,
    pub set: Option<String>,
}

impl From<&PageHandle> for PageInfo {
    fn from(handle: &PageHandle) -> Self {
        let status = handle.status();
        let key = handle.key();
        let set = key.set();
        PageInfo {
            full_page: status.mini_page.map(|mini| mini.full_page.0),
            offset: status.mini_page.map(|mini| mini.offset),
            pinned: status.pinned,
            dirty: status.dirty,
            page_num: key.number(),
            is_anonymous: matches!(key, PageKey::Anonymous(_)),
            size_frozen: status.frozen_size.is_some(),
            start_pos: status.location.map(|location| location.offset),
            num_bytes: handle.len(),
            database: set.map(|set| set.database().to_string()),
            set: set.map(|set| set.set().to_string()),
        }
    }
}
