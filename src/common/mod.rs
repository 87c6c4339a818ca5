//! Common types and utilities shared across slabpool.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration
//! - Error types
//! - Identifiers (FullPageId, SetId, PageKey)
//! - Logging setup

pub mod config;
pub mod error;
mod full_page_id;
pub mod logging;
mod page_id;

pub use config::BufferManagerConfig;
pub use error::{Error, Result};
pub use full_page_id::FullPageId;
pub use page_id::{is_valid_name, PageKey, SetId};
