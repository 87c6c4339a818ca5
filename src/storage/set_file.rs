//! Set File - the append-only file behind a named set.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{Result, SetId};
use crate::storage::file_io;

/// The file holding every committed page of one set.
///
/// # File Layout
/// Pages are variable sized (a page occupies exactly its frozen size), so
/// they are not at `index × PAGE_SIZE`. Each page's offset is reserved when
/// the page is first unpinned, by bumping the end-of-file counter:
/// ```text
/// ┌──────────┬────────┬──────────────────┬──────┬─────────
/// │ page 0   │ page 2 │ page 1           │ ...  │  (end_of_file)
/// │ 16 bytes │ 8 B    │ 64 bytes         │      │
/// └──────────┴────────┴──────────────────┴──────┴─────────
/// ```
/// Reserved ranges are never reused or moved.
///
/// # Thread Safety
/// `SetFile` is shared by reference. Reservations bump an atomic counter,
/// and reads and writes are positional, so page I/O at different offsets
/// does not serialize.
pub struct SetFile {
    path: PathBuf,
    file: File,
    /// Next append position.
    end_of_file: AtomicU64,
}

impl SetFile {
    /// Open (or create) the file for `set` under `storage_root`.
    ///
    /// The end-of-file counter starts at the larger of `recorded_end` (from
    /// the metadata file) and the current file length, so an append never
    /// lands on bytes that were already reserved.
    pub fn open(storage_root: &Path, set: &SetId, recorded_end: u64) -> Result<Self> {
        let dir = storage_root.join(set.database());
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.set", set.set()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            end_of_file: AtomicU64::new(recorded_end.max(file_len)),
        })
    }

    /// Reserve `len` bytes at the end of the file, returning their offset.
    pub fn reserve(&self, len: usize) -> u64 {
        self.end_of_file.fetch_add(len as u64, Ordering::SeqCst)
    }

    /// Write `data` at `offset`.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        file_io::write_all_at(&self.file, offset, data)?;
        Ok(())
    }

    /// Fill `buf` from `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        file_io::read_exact_at(&self.file, offset, buf)?;
        Ok(())
    }

    /// Flush written pages to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    #[inline]
    pub fn end_of_file(&self) -> u64 {
        self.end_of_file.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
