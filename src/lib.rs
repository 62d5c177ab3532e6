//! # carvedb - Forensic SQLite Analyzer
//!
//! carvedb is a read-only analyzer for SQLite database files and their
//! companion write-ahead logs and rollback journals. It decodes the
//! on-disk format bit for bit, reconstructs the database as a chain of
//! immutable snapshots (one per WAL commit), diffs table b-trees across
//! snapshots, and *carves* deleted records out of freeblocks and
//! unallocated page regions using per-table serial-type signatures.
//!
//! ## Quick Start
//!
//! ```ignore
//! use carvedb::history::{HistoryOptions, TableHistory};
//! use carvedb::signatures::TableSignature;
//! use carvedb::version::VersionChain;
//!
//! let chain = VersionChain::open("evidence.db", Some("evidence.db-wal"), true)?;
//! let entry = chain.base().master_schema().row_by_name("messages").unwrap();
//! let signature = TableSignature::generate(&chain, entry)?;
//!
//! let options = HistoryOptions { carve: true, carve_freelists: false };
//! for commit in TableHistory::new(&chain, "messages", Some(&signature), options) {
//!     let commit = commit?;
//!     for cell in &commit.carved_cells {
//!         println!("recovered: {cell:?}");
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │   Driver (bin) / external writers      │
//! ├────────────────────────────────────────┤
//! │  history: per-table commit iteration   │
//! ├───────────────────┬────────────────────┤
//! │ signatures        │ carving            │
//! ├───────────────────┴────────────────────┤
//! │  version: base + WAL commit snapshots  │
//! ├────────────────────────────────────────┤
//! │  schema │ pages │ format │ encoding    │
//! ├────────────────────────────────────────┤
//! │  storage: read-only mmap file sources  │
//! └────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Input files are never written, locked or remapped.
//! - Every snapshot is immutable; page resolution inside a version is
//!   deterministic and total over `[1, database_size_in_pages]`.
//! - Carving failures are silent per trial: a span either yields a
//!   carved cell or it does not.
//! - The core is single-threaded; run one instance per input file.
//!
//! ## Module Overview
//!
//! - [`encoding`]: varints, serial types, value decoding
//! - [`format`]: database/WAL/journal/WAL-index headers
//! - [`storage`]: read-only mmap sources and the warning collector
//! - [`pages`]: b-tree pages, cells, records, overflow, freelist,
//!   pointer map
//! - [`schema`]: sqlite_master and CREATE TABLE parsing
//! - [`version`]: the snapshot chain
//! - [`history`]: per-table commit events
//! - [`signatures`]: per-table serial-type signatures
//! - [`carving`]: freeblock and unallocated-region record recovery
//! - [`output`]: sink naming rules and text rendering
//! - [`cli`]: the frozen driver options record

#[macro_use]
mod macros;

pub mod carving;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod format;
pub mod history;
pub mod output;
pub mod pages;
pub mod schema;
pub mod signatures;
pub mod storage;
pub mod version;

pub use errors::{CarvingError, ParsingError, SignatureError, VersionError};
pub use history::{Commit, HistoryOptions, TableHistory};
pub use signatures::TableSignature;
pub use version::{Version, VersionChain};
