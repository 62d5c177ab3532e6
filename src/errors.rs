//! # Error Taxonomy
//!
//! Typed errors for the three failure families of a forensic parse:
//!
//! - [`ParsingError`]: structural violations inside a single file entity
//!   (header, page, cell, record, master-schema row). Fatal to the entity in
//!   strict mode; several kinds are downgraded to warnings when strict
//!   format checking is off.
//! - [`VersionError`]: failures assembling the snapshot chain from the
//!   database file and WAL.
//! - [`SignatureError`] / [`CarvingError`]: signature generation rejections
//!   and per-trial carve failures. A failed carve trial is a normal outcome,
//!   not an exceptional one; callers convert it into "no cell emitted".
//!
//! ## Propagation Policy
//!
//! | Policy | Errors | Behavior |
//! |--------|--------|----------|
//! | Fatal | magic mismatch, page type out of range (strict) | returned to caller |
//! | Downgradable | header field deviations (non-strict) | warning + continue |
//! | Local | `CarvingError` during a trial | silent, no cell emitted |
//!
//! The binary converts all of these into `eyre::Report` for display.

use std::path::PathBuf;

use thiserror::Error;

/// Structural violations while decoding a single entity of a file.
#[derive(Error, Debug)]
pub enum ParsingError {
    /// Database, WAL, journal or WAL-index header failed validation.
    #[error("header parsing failed: {detail}")]
    Header { detail: String },

    /// A row of sqlite_master could not be interpreted.
    #[error("master schema row parsing failed for {name:?}: {detail}")]
    MasterSchemaRow { name: String, detail: String },

    /// A non-b-tree page (overflow, freelist, pointer map) is malformed.
    #[error("page {page} parsing failed: {detail}")]
    Page { page: u32, detail: String },

    /// A b-tree page header, cell pointer array or freeblock chain is
    /// malformed.
    #[error("b-tree page {page} parsing failed: {detail}")]
    BTreePage { page: u32, detail: String },

    /// A cell body could not be decoded.
    #[error("cell parsing failed on page {page} at offset {offset}: {detail}")]
    Cell {
        page: u32,
        offset: usize,
        detail: String,
    },

    /// A record payload header/body is inconsistent.
    #[error("record parsing failed: {detail}")]
    Record { detail: String },

    /// Read past the end of the mapped file.
    #[error("short read: wanted {wanted} bytes at offset {offset}, file has {available}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        available: u64,
    },

    /// Input file could not be opened or mapped.
    #[error("cannot open '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures assembling the version chain.
#[derive(Error, Debug)]
pub enum VersionError {
    /// The base database snapshot could not be built.
    #[error("database parsing failed: {detail}")]
    Database { detail: String },

    /// The WAL file as a whole is unusable.
    #[error("wal parsing failed: {detail}")]
    Wal { detail: String },

    /// A single WAL frame is malformed.
    #[error("wal frame {frame_index} parsing failed: {detail}")]
    WalFrame { frame_index: usize, detail: String },

    /// A commit-record snapshot could not be synthesized from its frames.
    #[error("wal commit record {version} parsing failed: {detail}")]
    WalCommitRecord { version: u32, detail: String },

    #[error(transparent)]
    Parsing(#[from] ParsingError),
}

/// A signature was requested for an entry kind that cannot be carved.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("cannot build a signature for virtual table '{name}'")]
    VirtualTable { name: String },

    #[error("cannot build a signature for WITHOUT ROWID table '{name}'")]
    WithoutRowId { name: String },

    #[error("cannot build a signature for '{name}': entry is not a table")]
    NotATable { name: String },

    #[error("cannot build a signature for internal object '{name}' with no SQL")]
    NoSql { name: String },

    #[error(transparent)]
    Parsing(#[from] ParsingError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Per-trial carve failures. Silent at the carver boundary.
#[derive(Error, Debug)]
pub enum CarvingError {
    /// A forward or reverse varint could not be decoded from carved bytes.
    #[error("invalid varint at offset {offset}")]
    InvalidVarInt { offset: usize },

    /// A candidate cell failed reconstruction.
    #[error("cell carving failed at offset {offset}: {detail}")]
    Cell { offset: usize, detail: String },

    /// The signature cannot be applied at all (no usable flavor).
    #[error("no usable signature for table '{name}'")]
    NoSignature { name: String },
}
