//! Storage layer - disk I/O and on-disk formats.
//!
//! This module handles persistent and transient storage:
//! - [`DiskManager`] - Byte-range I/O at recorded offsets
//! - [`SetFile`] - One append-only file per named set
//! - [`ScratchFile`] - Shared file for spilled anonymous pages
//! - [`metadata`] - The directory persisted across restarts

mod disk_manager;
mod file_io;
pub mod metadata;
mod scratch_file;
mod set_file;

pub use disk_manager::{DiskLocation, DiskManager};
pub use metadata::{Metadata, PageLocation, SetMetadata};
pub use scratch_file::ScratchFile;
pub use set_file::SetFile;
