//! # WAL Commit-Record Snapshots
//!
//! Each commit frame group in the WAL yields one snapshot: page `p`
//! resolves to the newest frame image for `p` at or before this commit,
//! and to the base file otherwise. The per-page frame index is built once
//! per commit by extending the previous commit's index, so page lookup is
//! a hash probe and version construction is linear in WAL size.
//!
//! When a commit rewrites page 1, the snapshot re-reads the database
//! header (schema cookie, freelist root, page counters) from the new
//! image; the declared database size always comes from the commit frame,
//! which may truncate the page space.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::config::DB_HEADER_SIZE;
use crate::encoding::TextEncoding;
use crate::errors::{ParsingError, VersionError};
use crate::format::wal::WalFrame;
use crate::format::DatabaseHeader;
use crate::pages::freelist::{freelist_page_numbers, walk_freelist, FreelistTrunkPage};
use crate::pages::PageSource;
use crate::schema::MasterSchema;
use crate::storage::{FileSource, Warnings};

/// One immutable snapshot synthesized from a WAL commit.
#[derive(Debug)]
pub struct WalCommitRecord {
    db: Arc<FileSource>,
    wal: Arc<FileSource>,
    /// 1-based position in the chain (version 0 is the base).
    pub version_number: u32,
    /// Physical index of this record's commit frame in the WAL.
    pub commit_frame_index: usize,
    /// Database size declared by the commit frame.
    pub page_count: u32,
    /// Pages in the base file; pages above this exist only in the WAL.
    base_page_count: u32,
    /// Header as of this version's newest page 1.
    pub header: DatabaseHeader,
    pub master_schema: MasterSchema,
    /// Newest frame data offset for every page touched up to this commit.
    page_frames: HashMap<u32, u64>,
    /// Pages written by this commit alone.
    pub updated_pages: HashSet<u32>,
    pub freelist_trunks: Vec<FreelistTrunkPage>,
    pub freelist_pages: Vec<u32>,
}

impl WalCommitRecord {
    /// Builds the snapshot for one commit by overlaying its frames onto
    /// the accumulated page index of the previous version.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        db: Arc<FileSource>,
        wal: Arc<FileSource>,
        version_number: u32,
        frames: &[WalFrame],
        previous_page_frames: &HashMap<u32, u64>,
        previous_header: &DatabaseHeader,
        base_page_count: u32,
        strict: bool,
        warnings: &Warnings,
    ) -> Result<Self, VersionError> {
        let commit_frame = frames.last().ok_or(VersionError::WalCommitRecord {
            version: version_number,
            detail: "commit record without frames".into(),
        })?;
        debug_assert!(commit_frame.header.is_commit());

        let mut page_frames = previous_page_frames.clone();
        let mut updated_pages = HashSet::with_capacity(frames.len());
        for frame in frames {
            page_frames.insert(frame.header.page_number, frame.data_offset);
            updated_pages.insert(frame.header.page_number);
        }

        let page_count = commit_frame.header.db_size_after_commit;

        // Refresh header state from the newest page 1 image, if any.
        let header = match page_frames.get(&1) {
            Some(&offset) => {
                let bytes = wal
                    .slice(offset, DB_HEADER_SIZE)
                    .map_err(VersionError::Parsing)?;
                DatabaseHeader::parse(bytes, strict, warnings)?
            }
            None => previous_header.clone(),
        };

        let mut record = Self {
            db,
            wal,
            version_number,
            commit_frame_index: commit_frame.index,
            page_count,
            base_page_count,
            header,
            master_schema: MasterSchema::default(),
            page_frames,
            updated_pages,
            freelist_trunks: Vec::new(),
            freelist_pages: Vec::new(),
        };

        record.master_schema =
            MasterSchema::parse(&record).map_err(|error| VersionError::WalCommitRecord {
                version: version_number,
                detail: format!("master schema: {error}"),
            })?;

        record.freelist_trunks = walk_freelist(
            &record,
            record.header.first_freelist_trunk_page,
            record.header.freelist_page_count,
        )?;
        record.freelist_pages = freelist_page_numbers(&record.freelist_trunks);

        Ok(record)
    }

    /// The accumulated page->frame index, for building the next version.
    pub fn page_frames(&self) -> &HashMap<u32, u64> {
        &self.page_frames
    }

    /// True when this commit shrank the page space below the page's number.
    pub fn truncated_away(&self, page_number: u32) -> bool {
        page_number > self.page_count
    }
}

impl PageSource for WalCommitRecord {
    fn page_size(&self) -> u32 {
        self.header.page_size
    }

    fn reserved_bytes(&self) -> u8 {
        self.header.reserved_bytes_per_page
    }

    fn text_encoding(&self) -> TextEncoding {
        self.header.text_encoding
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_bytes(&self, number: u32) -> Result<&[u8], ParsingError> {
        if number == 0 || number > self.page_count {
            return Err(ParsingError::Page {
                page: number,
                detail: format!("page beyond version size of {} pages", self.page_count),
            });
        }
        if let Some(&offset) = self.page_frames.get(&number) {
            return self.wal.slice(offset, self.header.page_size as usize);
        }
        if number > self.base_page_count {
            return Err(ParsingError::Page {
                page: number,
                detail: "page exists in neither the base file nor the WAL".into(),
            });
        }
        self.db.page(number, self.header.page_size)
    }
}
