//! # Version Model
//!
//! The database as a chain of immutable snapshots:
//!
//! ```text
//! version 0          version 1               version N
//! +-----------+      +------------------+    +------------------+
//! | base file | ---> | base + commit 1  | -> | base + commits   |
//! |           |      | frame overlay    |    | 1..N overlay     |
//! +-----------+      +------------------+    +------------------+
//! ```
//!
//! [`Version`] is a sum over the base [`DatabaseSnapshot`] and the WAL
//! [`WalCommitRecord`]s; both expose the same [`PageSource`] page fetcher,
//! so every downstream consumer (schema, history, carver) is agnostic to
//! where a page's bytes physically live. [`VersionChain::open`] builds the
//! whole chain up front; random access by version number is O(1) and page
//! materialization inside a version is a hash probe.

pub mod commit_record;
pub mod database;

pub use commit_record::WalCommitRecord;
pub use database::DatabaseSnapshot;

use std::path::Path;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::encoding::TextEncoding;
use crate::errors::{ParsingError, VersionError};
use crate::format::{DatabaseHeader, Wal};
use crate::pages::{PageKind, PageSource};
use crate::schema::MasterSchema;
use crate::storage::{FileSource, Warnings};

/// One snapshot of the database: the base file or a WAL commit overlay.
#[derive(Debug)]
pub enum Version {
    Base(DatabaseSnapshot),
    Commit(WalCommitRecord),
}

impl Version {
    pub fn number(&self) -> u32 {
        match self {
            Version::Base(_) => crate::config::BASE_VERSION_NUMBER,
            Version::Commit(commit) => commit.version_number,
        }
    }

    pub fn header(&self) -> &DatabaseHeader {
        match self {
            Version::Base(base) => &base.header,
            Version::Commit(commit) => &commit.header,
        }
    }

    pub fn master_schema(&self) -> &MasterSchema {
        match self {
            Version::Base(base) => &base.master_schema,
            Version::Commit(commit) => &commit.master_schema,
        }
    }

    pub fn freelist_pages(&self) -> &[u32] {
        match self {
            Version::Base(base) => &base.freelist_pages,
            Version::Commit(commit) => &commit.freelist_pages,
        }
    }

    /// Pages written by this version's commit; empty for the base.
    pub fn updated_pages(&self) -> Option<&HashSet<u32>> {
        match self {
            Version::Base(_) => None,
            Version::Commit(commit) => Some(&commit.updated_pages),
        }
    }

    fn freelist_trunks(&self) -> &[crate::pages::FreelistTrunkPage] {
        match self {
            Version::Base(base) => &base.freelist_trunks,
            Version::Commit(commit) => &commit.freelist_trunks,
        }
    }

    /// Structural classification of every page in this snapshot.
    ///
    /// Every page number in `[1, page_count]` appears exactly once in the
    /// result; pages not reachable from the schema's b-trees, the
    /// freelist or the pointer-map interval stay `Unaccounted`.
    pub fn classify_pages(&self) -> Result<HashMap<u32, PageKind>, VersionError> {
        let mut kinds: HashMap<u32, PageKind> =
            HashMap::with_capacity(self.page_count() as usize);
        for number in 1..=self.page_count() {
            kinds.insert(number, PageKind::Unaccounted);
        }

        if self.header().auto_vacuum() {
            for number in crate::pages::ptrmap::pointer_map_page_numbers(
                self.page_count(),
                self.usable_page_size(),
            ) {
                kinds.insert(number, PageKind::PointerMap);
            }
        }

        for trunk in self.freelist_trunks() {
            kinds.insert(trunk.number, PageKind::FreelistTrunk);
            for &leaf in &trunk.leaf_page_numbers {
                kinds.insert(leaf, PageKind::FreelistLeaf);
            }
        }

        // The schema b-tree rooted at page 1, then every object tree.
        let mut roots = vec![1u32];
        roots.extend(
            self.master_schema()
                .rows
                .iter()
                .filter(|row| row.root_page != 0)
                .map(|row| row.root_page),
        );
        for root in roots {
            let (tree, _) = crate::pages::walk::walk_btree(self, root)
                .map_err(VersionError::Parsing)?;
            for (number, kind) in tree.pages {
                kinds.insert(number, kind);
            }
        }

        Ok(kinds)
    }
}

impl PageSource for Version {
    fn page_size(&self) -> u32 {
        match self {
            Version::Base(base) => base.page_size(),
            Version::Commit(commit) => commit.page_size(),
        }
    }

    fn reserved_bytes(&self) -> u8 {
        match self {
            Version::Base(base) => base.reserved_bytes(),
            Version::Commit(commit) => commit.reserved_bytes(),
        }
    }

    fn text_encoding(&self) -> TextEncoding {
        match self {
            Version::Base(base) => base.text_encoding(),
            Version::Commit(commit) => commit.text_encoding(),
        }
    }

    fn page_count(&self) -> u32 {
        match self {
            Version::Base(base) => base.page_count(),
            Version::Commit(commit) => commit.page_count(),
        }
    }

    fn page_bytes(&self, number: u32) -> Result<&[u8], ParsingError> {
        match self {
            Version::Base(base) => base.page_bytes(number),
            Version::Commit(commit) => commit.page_bytes(number),
        }
    }
}

/// The ordered snapshot chain plus the WAL diagnostics that built it.
#[derive(Debug)]
pub struct VersionChain {
    pub versions: Vec<Version>,
    pub wal: Option<Wal>,
    pub warnings: Arc<Warnings>,
}

impl VersionChain {
    /// Opens the database and optional WAL into a full chain.
    pub fn open<P: AsRef<Path>>(
        database_path: P,
        wal_path: Option<P>,
        strict: bool,
    ) -> Result<Self, VersionError> {
        let warnings = Arc::new(Warnings::new());
        let db = Arc::new(FileSource::open(database_path).map_err(VersionError::Parsing)?);

        let base = DatabaseSnapshot::open(Arc::clone(&db), strict, &warnings)?;
        let base_page_count = base.page_count;
        let base_header = base.header.clone();

        let mut versions = vec![Version::Base(base)];
        let mut parsed_wal = None;

        if let Some(wal_path) = wal_path {
            let wal_source =
                Arc::new(FileSource::open(wal_path).map_err(VersionError::Parsing)?);
            let wal = Wal::parse(&wal_source, strict, &warnings)?;

            if wal.header.page_size != base_header.page_size {
                return Err(VersionError::Wal {
                    detail: format!(
                        "WAL page size {} disagrees with database page size {}",
                        wal.header.page_size, base_header.page_size
                    ),
                });
            }

            let mut previous_frames: HashMap<u32, u64> = HashMap::new();
            let mut previous_header = base_header;
            for commit_number in 1..=wal.commit_count() as u32 {
                let frames = wal.frames_for_commit(commit_number);
                let commit = WalCommitRecord::build(
                    Arc::clone(&db),
                    Arc::clone(&wal_source),
                    commit_number,
                    frames,
                    &previous_frames,
                    &previous_header,
                    base_page_count,
                    strict,
                    &warnings,
                )?;
                previous_frames = commit.page_frames().clone();
                previous_header = commit.header.clone();
                versions.push(Version::Commit(commit));
            }
            parsed_wal = Some(wal);
        }

        Ok(Self {
            versions,
            wal: parsed_wal,
            warnings,
        })
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// O(1) access by version number.
    pub fn version(&self, number: u32) -> Option<&Version> {
        self.versions.get(number as usize)
    }

    pub fn base(&self) -> &Version {
        &self.versions[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Version> {
        self.versions.iter()
    }
}
