//! # Driver Options
//!
//! The frozen configuration record the driver layer assembles from its
//! command line and hands to the core. The core never reads flags,
//! config files or the environment itself; it consumes this struct.
//!
//! Companion-file auto-detection follows SQLite's naming: `<db>-wal` and
//! `<db>-journal` beside the database, unless an explicit path overrides
//! them or `no_journal` disables detection entirely.

use std::path::{Path, PathBuf};

/// Frozen analysis configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub database_path: PathBuf,
    /// Explicit WAL path; `None` means auto-detect.
    pub wal_path: Option<PathBuf>,
    /// Explicit rollback-journal path; `None` means auto-detect.
    pub journal_path: Option<PathBuf>,
    /// Disables companion auto-detection altogether.
    pub no_journal: bool,
    pub strict_format_checking: bool,
    pub carve: bool,
    pub carve_freelists: bool,
    /// Inclusion filter; empty means every table.
    pub tables: Vec<String>,
    pub exempted_tables: Vec<String>,
    /// Diagnostic emitters.
    pub print_schema: bool,
    pub print_schema_history: bool,
    pub print_signatures: bool,
    /// Export selection, passed through to external writers.
    pub export_formats: Vec<String>,
    pub output_directory: Option<PathBuf>,
    pub file_prefix: Option<String>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Options {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            wal_path: None,
            journal_path: None,
            no_journal: false,
            strict_format_checking: true,
            carve: false,
            carve_freelists: false,
            tables: Vec::new(),
            exempted_tables: Vec::new(),
            print_schema: false,
            print_schema_history: false,
            print_signatures: false,
            export_formats: vec!["text".to_string()],
            output_directory: None,
            file_prefix: None,
            log_level: "warn".to_string(),
            log_file: None,
        }
    }

    /// The WAL to use: explicit path, else the `-wal` sibling if present.
    pub fn resolved_wal_path(&self) -> Option<PathBuf> {
        if self.no_journal {
            return None;
        }
        if let Some(path) = &self.wal_path {
            return Some(path.clone());
        }
        let candidate = sibling(&self.database_path, "-wal");
        candidate.exists().then_some(candidate)
    }

    /// The rollback journal to use, by the same rules.
    pub fn resolved_journal_path(&self) -> Option<PathBuf> {
        if self.no_journal {
            return None;
        }
        if let Some(path) = &self.journal_path {
            return Some(path.clone());
        }
        let candidate = sibling(&self.database_path, "-journal");
        candidate.exists().then_some(candidate)
    }
}

fn sibling(database_path: &Path, suffix: &str) -> PathBuf {
    let mut name = database_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    database_path.with_file_name(name)
}
