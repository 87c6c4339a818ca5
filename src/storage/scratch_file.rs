//! Scratch File - transient storage for spilled anonymous pages.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::Result;
use crate::storage::file_io;

/// One process-wide file that anonymous pages are spilled into.
///
/// Ranges are handed out in whole size-class capacities. A released range
/// goes on a free list keyed by its capacity and is reused by the next
/// spill of the same capacity before the file is extended.
///
/// The file is truncated when opened; nothing in it survives a restart.
///
/// Range bookkeeping sits behind a `Mutex`; reads and writes are positional
/// and take no lock.
pub struct ScratchFile {
    path: PathBuf,
    file: File,
    ranges: Mutex<ScratchRanges>,
}

#[derive(Default)]
struct ScratchRanges {
    /// First byte past the last range ever handed out.
    end: u64,
    /// Released ranges, by capacity.
    available: BTreeMap<usize, Vec<u64>>,
}

impl ScratchFile {
    /// Create (or truncate) the scratch file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
            ranges: Mutex::new(ScratchRanges::default()),
        })
    }

    /// Get a range of `capacity` bytes, reusing a released one if possible.
    pub fn allocate(&self, capacity: usize) -> u64 {
        let mut ranges = self.ranges.lock();
        if let Some(offset) = ranges.available.get_mut(&capacity).and_then(Vec::pop) {
            return offset;
        }
        let offset = ranges.end;
        ranges.end += capacity as u64;
        offset
    }

    /// Return a range to the free list.
    pub fn release(&self, offset: u64, capacity: usize) {
        self.ranges
            .lock()
            .available
            .entry(capacity)
            .or_default()
            .push(offset);
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        file_io::write_all_at(&self.file, offset, data)?;
        Ok(())
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        file_io::read_exact_at(&self.file, offset, buf)?;
        Ok(())
    }

    /// Number of released ranges waiting for reuse.
    pub fn available_count(&self) -> usize {
        self.ranges.lock().available.values().map(Vec::len).sum()
    }

    /// Bytes handed out so far (the logical file size).
    #[inline]
    pub fn len(&self) -> u64 {
        self.ranges.lock().end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
