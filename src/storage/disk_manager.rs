//! Disk Manager - byte-range I/O for set files and the scratch file.
//!
//! The [`DiskManager`] knows nothing about pinning or eviction. It owns:
//! - One append-only [`SetFile`] per named set, opened lazily
//! - The shared [`ScratchFile`] for spilled anonymous pages
//!
//! and reads or writes byte ranges at offsets the buffer manager recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{PageKey, Result, SetId};
use crate::storage::{ScratchFile, SetFile};

/// Where a page's bytes live on disk: `len` bytes at `offset` of the page's
/// set file (named pages) or of the scratch file (anonymous pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskLocation {
    pub offset: u64,
    pub len: usize,
}

impl DiskLocation {
    #[inline]
    pub fn new(offset: u64, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

struct SetTable {
    open: HashMap<SetId, Arc<SetFile>>,
    /// End-of-file values restored from metadata, for sets not opened yet.
    recorded: HashMap<SetId, u64>,
}

/// Manages disk I/O for every set plus the scratch file.
///
/// # Thread Safety
/// - `sets`: `Mutex` held only to find or open a set file
/// - set and scratch files do positional I/O without a lock; only the
///   reservation counter and the scratch free list are synchronized
pub struct DiskManager {
    storage_root: PathBuf,
    sets: Mutex<SetTable>,
    scratch: ScratchFile,
}

impl DiskManager {
    /// Create a disk manager rooted at `storage_root`, truncating the scratch
    /// file at `scratch_path`.
    ///
    /// `recorded_ends` seeds each set's end-of-file counter (from the
    /// metadata file).
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        storage_root: P,
        scratch_path: Q,
        recorded_ends: impl IntoIterator<Item = (SetId, u64)>,
    ) -> Result<Self> {
        let storage_root = storage_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_root)?;
        let scratch = ScratchFile::create(scratch_path)?;

        Ok(Self {
            storage_root,
            sets: Mutex::new(SetTable {
                open: HashMap::new(),
                recorded: recorded_ends.into_iter().collect(),
            }),
            scratch,
        })
    }

    /// Get the file for `set`, opening it on first access.
    ///
    /// # Errors
    /// I/O errors from creating the database directory or opening the file.
    pub fn open_set(&self, set: &SetId) -> Result<Arc<SetFile>> {
        let mut sets = self.sets.lock();
        if let Some(file) = sets.open.get(set) {
            return Ok(Arc::clone(file));
        }

        let recorded = sets.recorded.remove(set).unwrap_or(0);
        let file = SetFile::open(&self.storage_root, set, recorded)?;
        debug!(
            set = %set,
            path = %file.path().display(),
            end_of_file = file.end_of_file(),
            "disk.open_set"
        );

        let file = Arc::new(file);
        sets.open.insert(set.clone(), Arc::clone(&file));
        Ok(file)
    }

    /// Reserve `len` bytes at the end of `set`'s file.
    ///
    /// # Panics
    /// Panics if the set was never opened; a named page is always created
    /// through [`DiskManager::open_set`] first.
    pub fn reserve(&self, set: &SetId, len: usize) -> DiskLocation {
        let file = {
            let sets = self.sets.lock();
            match sets.open.get(set) {
                Some(file) => Arc::clone(file),
                None => panic!("invariant violation: {} reserved before it was opened", set),
            }
        };
        let offset = file.reserve(len);
        DiskLocation::new(offset, len)
    }

    /// Write a page's bytes at its recorded location.
    pub fn write_page(&self, key: &PageKey, location: DiskLocation, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), location.len);
        match key {
            PageKey::Named { set, .. } => {
                let file = self.open_set(set)?;
                check_within(set, location, file.end_of_file());
                file.write_at(location.offset, data)
            }
            PageKey::Anonymous(_) => self.scratch.write_at(location.offset, data),
        }
    }

    /// Read a page's bytes from its recorded location into `buf`.
    pub fn read_page(&self, key: &PageKey, location: DiskLocation, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), location.len);
        match key {
            PageKey::Named { set, .. } => {
                let file = self.open_set(set)?;
                check_within(set, location, file.end_of_file());
                file.read_at(location.offset, buf)
            }
            PageKey::Anonymous(_) => self.scratch.read_at(location.offset, buf),
        }
    }

    /// Pick a scratch range of `capacity` bytes for a spilled page of `len`.
    pub fn allocate_scratch(&self, len: usize, capacity: usize) -> DiskLocation {
        let offset = self.scratch.allocate(capacity);
        DiskLocation::new(offset, len)
    }

    /// Return a spilled page's scratch range to the free list.
    pub fn release_scratch(&self, location: DiskLocation, capacity: usize) {
        self.scratch.release(location.offset, capacity);
    }

    /// Logical size of the scratch file.
    pub fn scratch_len(&self) -> u64 {
        self.scratch.len()
    }

    /// Current end-of-file of `set`, if it is known.
    pub fn end_of_file(&self, set: &SetId) -> Option<u64> {
        let sets = self.sets.lock();
        match sets.open.get(set) {
            Some(file) => Some(file.end_of_file()),
            None => sets.recorded.get(set).copied(),
        }
    }

    /// End-of-file of every known set, opened or not.
    pub fn set_ends(&self) -> Vec<(SetId, u64)> {
        let sets = self.sets.lock();
        let mut ends: Vec<(SetId, u64)> = sets
            .open
            .iter()
            .map(|(set, file)| (set.clone(), file.end_of_file()))
            .chain(sets.recorded.iter().map(|(set, &end)| (set.clone(), end)))
            .collect();
        ends.sort();
        ends
    }

    /// Flush every open set file.
    pub fn sync_sets(&self) -> Result<()> {
        let files: Vec<_> = self.sets.lock().open.values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }

    /// Delete the scratch file. Called at shutdown.
    pub fn remove_scratch(&self) -> Result<()> {
        std::fs::remove_file(self.scratch.path())?;
        Ok(())
    }

    #[inline]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }
}

fn check_within(set: &SetId, location: DiskLocation, end_of_file: u64) {
    assert!(
        location.end() <= end_of_file,
        "invariant violation: {} location {}..{} is past end of file {}",
        set,
        location.offset,
        location.end(),
        end_of_file
    );
}
