//! Configuration for the buffer manager.
//!
//! The manager consumes, but does not own, its configuration: the size of the
//! memory pool, the full page size, the smallest mini-page, and where the
//! scratch file, metadata file and set files live.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::{Error, Result};

/// Default size of a full page in bytes (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default size of the smallest mini-page (size class 0).
pub const DEFAULT_MIN_PAGE_SIZE: usize = 8;

/// Default number of full pages in the pool.
pub const DEFAULT_NUM_FULL_PAGES: usize = 16;

/// Default scratch file name, relative to the storage root.
pub const DEFAULT_SCRATCH_FILE: &str = "scratch.tmp";

/// Default metadata file name, relative to the storage root.
pub const DEFAULT_METADATA_FILE: &str = "metadata.bin";

/// Buffer manager configuration.
///
/// # Example
/// ```
/// use slabpool::BufferManagerConfig;
///
/// let config = BufferManagerConfig::from_toml_str(r#"
///     storage_root = "/tmp/slabpool"
///     page_size = 65536
///     pool_size = 1048576
/// "#).unwrap();
///
/// assert_eq!(config.num_full_pages(), 16);
/// assert_eq!(config.min_page_size, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferManagerConfig {
    /// Total bytes of the memory pool. Rounded down to a whole number of
    /// full pages.
    pub pool_size: usize,

    /// Size of a full page; also the largest allocation unit.
    pub page_size: usize,

    /// Size of the smallest mini-page.
    pub min_page_size: usize,

    /// Scratch file for spilled anonymous pages.
    pub scratch_file: PathBuf,

    /// File persisting the `(set, index) -> (offset, length)` directory.
    pub metadata_file: PathBuf,

    /// Directory holding one sub-directory per database.
    pub storage_root: PathBuf,
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_PAGE_SIZE * DEFAULT_NUM_FULL_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            min_page_size: DEFAULT_MIN_PAGE_SIZE,
            scratch_file: PathBuf::from(DEFAULT_SCRATCH_FILE),
            metadata_file: PathBuf::from(DEFAULT_METADATA_FILE),
            storage_root: PathBuf::from("."),
        }
    }
}

impl BufferManagerConfig {
    /// Default configuration rooted at `storage_root`.
    pub fn new<P: AsRef<Path>>(storage_root: P) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the page size and the number of full pages in the pool.
    pub fn with_pages(mut self, page_size: usize, num_full_pages: usize) -> Self {
        self.page_size = page_size;
        self.pool_size = page_size * num_full_pages;
        self
    }

    /// Set the smallest mini-page size.
    pub fn with_min_page_size(mut self, min_page_size: usize) -> Self {
        self.min_page_size = min_page_size;
        self
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the invariants the slab allocator relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }
        if !self.min_page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "min_page_size {} is not a power of two",
                self.min_page_size
            )));
        }
        if self.min_page_size > self.page_size {
            return Err(Error::InvalidConfig(format!(
                "min_page_size {} exceeds page_size {}",
                self.min_page_size, self.page_size
            )));
        }
        if self.num_full_pages() == 0 {
            return Err(Error::InvalidConfig(format!(
                "pool_size {} holds no {}-byte page",
                self.pool_size, self.page_size
            )));
        }
        Ok(())
    }

    /// Number of full pages in the pool.
    #[inline]
    pub fn num_full_pages(&self) -> usize {
        self.pool_size / self.page_size.max(1)
    }

    /// Number of size classes: `min_page_size * 2^k` for `k` up to the page size.
    #[inline]
    pub fn num_size_classes(&self) -> usize {
        (self.page_size / self.min_page_size).trailing_zeros() as usize + 1
    }

    /// Scratch file path, resolved against the storage root.
    pub fn scratch_path(&self) -> PathBuf {
        self.storage_root.join(&self.scratch_file)
    }

    /// Metadata file path, resolved against the storage root.
    pub fn metadata_path(&self) -> PathBuf {
        self.storage_root.join(&self.metadata_file)
    }
}
