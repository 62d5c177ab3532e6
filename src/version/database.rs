//! # Base Database Snapshot
//!
//! Version 0 of the chain: the database exactly as the main file records
//! it, before any WAL overlay. Opening a snapshot parses the header,
//! derives the trustworthy page count, walks the freelist, locates
//! pointer-map pages when auto-vacuum is on, and reads the master schema
//! from the b-tree rooted at page 1.

use std::sync::Arc;

use crate::encoding::TextEncoding;
use crate::errors::{ParsingError, VersionError};
use crate::format::DatabaseHeader;
use crate::pages::freelist::{freelist_page_numbers, walk_freelist, FreelistTrunkPage};
use crate::pages::ptrmap::pointer_map_page_numbers;
use crate::pages::PageSource;
use crate::schema::MasterSchema;
use crate::storage::{FileSource, Warnings};

/// The database file as stored, exposed through [`PageSource`].
#[derive(Debug)]
pub struct DatabaseSnapshot {
    source: Arc<FileSource>,
    pub header: DatabaseHeader,
    pub page_count: u32,
    pub master_schema: MasterSchema,
    pub freelist_trunks: Vec<FreelistTrunkPage>,
    pub freelist_pages: Vec<u32>,
    pub pointer_map_pages: Vec<u32>,
}

impl DatabaseSnapshot {
    /// Opens the snapshot from a mapped database file.
    pub fn open(
        source: Arc<FileSource>,
        strict: bool,
        warnings: &Warnings,
    ) -> Result<Self, VersionError> {
        let header_bytes = source
            .slice(0, crate::config::DB_HEADER_SIZE)
            .map_err(|_| VersionError::Database {
                detail: "file shorter than the database header".into(),
            })?;
        let header = DatabaseHeader::parse(header_bytes, strict, warnings)?;
        let page_count = header.effective_page_count(source.len(), warnings);

        let mut snapshot = Self {
            source,
            header,
            page_count,
            master_schema: MasterSchema::default(),
            freelist_trunks: Vec::new(),
            freelist_pages: Vec::new(),
            pointer_map_pages: Vec::new(),
        };

        snapshot.master_schema =
            MasterSchema::parse(&snapshot).map_err(|error| VersionError::Database {
                detail: format!("master schema: {error}"),
            })?;

        snapshot.freelist_trunks = walk_freelist(
            &snapshot,
            snapshot.header.first_freelist_trunk_page,
            snapshot.header.freelist_page_count,
        )?;
        snapshot.freelist_pages = freelist_page_numbers(&snapshot.freelist_trunks);

        if snapshot.header.auto_vacuum() {
            snapshot.pointer_map_pages =
                pointer_map_page_numbers(snapshot.page_count, snapshot.usable_page_size());
        }

        Ok(snapshot)
    }
}

impl PageSource for DatabaseSnapshot {
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
        if number > self.page_count {
            return Err(ParsingError::Page {
                page: number,
                detail: format!("page beyond database size of {} pages", self.page_count),
            });
        }
        self.source.page(number, self.header.page_size)
    }
}
