//! Error types for slabpool.
//!
//! Only recoverable conditions are represented here. Misuse of the API
//! (freezing after unpin, touching the bytes of an unpinned page, asking for
//! more than a full page) and internal corruption panic instead, with messages
//! prefixed `contract violation:` or `invariant violation:`.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors returned by the buffer manager.
#[derive(Debug, Error)]
pub enum Error {
    /// Open/read/write failure on a set file, the scratch file or the
    /// metadata file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every full page hosts at least one pinned mini-page, so nothing can be
    /// evicted to make room.
    ///
    /// The caller decides whether to back off and retry; the manager never
    /// blocks waiting for pins held by someone else.
    #[error("no evictable full page available for a {requested}-byte mini-page")]
    ResourceExhausted {
        /// Capacity of the size class that could not be satisfied.
        requested: usize,
    },

    /// The metadata file exists but could not be decoded.
    #[error("corrupt metadata file {}: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    /// The configuration handed to the manager is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
