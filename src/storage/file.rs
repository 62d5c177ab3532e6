//! # Read-Only File Source
//!
//! A memory-mapped, read-only view of one input file (database, WAL,
//! journal or shm). All access is through bounds-checked slicing; a slice
//! request past the end of the file is a [`ParsingError::ShortRead`], which
//! downstream decoders report with the offending offset.
//!
//! Page-granular access uses 1-based page numbers, matching the format.
//! Page number 0 is the "no page" sentinel everywhere in the format and is
//! rejected here.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::errors::ParsingError;

#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    mmap: Mmap,
}

impl FileSource {
    /// Maps `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ParsingError> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|source| ParsingError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the file is opened read-only and the map is never
        // remapped; slices handed out borrow from `self` and cannot outlive
        // the map. External truncation of evidence files mid-analysis is
        // outside the supported operating model.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| ParsingError::Io {
                path: path.to_path_buf(),
                source,
            })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Bounds-checked byte slice at `offset`.
    pub fn slice(&self, offset: u64, length: usize) -> Result<&[u8], ParsingError> {
        let start = usize::try_from(offset).map_err(|_| ParsingError::ShortRead {
            offset,
            wanted: length,
            available: self.len(),
        })?;
        self.mmap
            .get(start..start + length)
            .ok_or(ParsingError::ShortRead {
                offset,
                wanted: length,
                available: self.len(),
            })
    }

    /// The bytes of 1-based page `number` for a given page size.
    pub fn page(&self, number: u32, page_size: u32) -> Result<&[u8], ParsingError> {
        if number == 0 {
            return Err(ParsingError::Page {
                page: 0,
                detail: "page number 0 is the no-page sentinel".into(),
            });
        }
        let offset = u64::from(number - 1) * u64::from(page_size);
        self.slice(offset, page_size as usize)
    }

    /// Byte offset of 1-based page `number`.
    pub fn page_offset(number: u32, page_size: u32) -> u64 {
        u64::from(number.saturating_sub(1)) * u64::from(page_size)
    }
}
