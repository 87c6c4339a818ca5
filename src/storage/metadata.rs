//! Metadata file - persists where every committed named page lives.
//!
//! # Layout (little-endian)
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     magic "SLABMETA"
//! 8       4     version (1)
//! 12      4     number of sets
//!         ...   per set:
//!               4 + n  database name (length-prefixed UTF-8)
//!               4 + n  set name (length-prefixed UTF-8)
//!               8      end of file
//!               8      number of pages
//!               24 × p (index, offset, length) triples
//! end-4   4     CRC32 of everything before it
//! ```

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::common::{is_valid_name, Error, Result, SetId};

const MAGIC: &[u8; 8] = b"SLABMETA";
const VERSION: u32 = 1;
const CHECKSUM_SIZE: usize = 4;

/// Where one committed page of a set lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLocation {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Everything persisted about one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMetadata {
    pub set: SetId,
    pub end_of_file: u64,
    pub pages: Vec<PageLocation>,
}

/// The whole metadata file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub sets: Vec<SetMetadata>,
}

impl Metadata {
    /// Serialize, including the trailing checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.sets.len() as u32).to_le_bytes());

        for set in &self.sets {
            put_str(&mut out, set.set.database());
            put_str(&mut out, set.set.set());
            out.extend_from_slice(&set.end_of_file.to_le_bytes());
            out.extend_from_slice(&(set.pages.len() as u64).to_le_bytes());
            for page in &set.pages {
                out.extend_from_slice(&page.index.to_le_bytes());
                out.extend_from_slice(&page.offset.to_le_bytes());
                out.extend_from_slice(&page.len.to_le_bytes());
            }
        }

        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Parse bytes produced by [`Metadata::encode`].
    ///
    /// The error is a human-readable reason; callers attach the path.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, String> {
        if data.len() < MAGIC.len() + 8 + CHECKSUM_SIZE {
            return Err(format!("file too short ({} bytes)", data.len()));
        }

        let (body, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != stored {
            return Err("checksum mismatch".into());
        }

        let mut reader = Reader { buf: body, pos: 0 };
        if reader.take(MAGIC.len())? != MAGIC {
            return Err("bad magic".into());
        }
        let version = reader.u32()?;
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }

        let num_sets = reader.u32()?;
        let mut sets = Vec::with_capacity(num_sets as usize);
        for _ in 0..num_sets {
            let database = reader.name()?;
            let set = reader.name()?;
            let end_of_file = reader.u64()?;
            let num_pages = reader.u64()?;

            let mut pages = Vec::new();
            for _ in 0..num_pages {
                pages.push(PageLocation {
                    index: reader.u64()?,
                    offset: reader.u64()?,
                    len: reader.u64()?,
                });
            }

            sets.push(SetMetadata {
                set: SetId::new(&database, &set),
                end_of_file,
                pages,
            });
        }

        if reader.pos != body.len() {
            return Err(format!("{} trailing bytes", body.len() - reader.pos));
        }

        Ok(Self { sets })
    }

    /// Load the metadata file at `path`, or `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        let metadata = Self::decode(&data).map_err(|reason| Error::CorruptMetadata {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!(path = %path.display(), sets = metadata.sets.len(), "metadata.load");
        Ok(Some(metadata))
    }

    /// Write the metadata file atomically (temp file + rename).
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.encode())?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), sets = self.sets.len(), "metadata.store");
        Ok(())
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| format!("truncated at byte {}", self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    fn name(&mut self) -> std::result::Result<String, String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        let name = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
        if !is_valid_name(name) {
            return Err(format!("malformed name {:?}", name));
        }
        Ok(name.to_string())
    }
}
