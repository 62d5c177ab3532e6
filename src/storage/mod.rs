//! # Storage Module
//!
//! Read-only access to the input files. Forensic parsing must never mutate
//! evidence, so the storage layer maps files with `memmap2` in read-only
//! mode and hands out borrowed byte slices; there is no write path at all.
//!
//! ## Components
//!
//! - [`FileSource`]: a read-only memory-mapped file with bounds-checked
//!   slicing and page-granular access
//! - [`Warnings`]: the injected collector for downgraded format deviations,
//!   owned by the file handle instead of any process-global registry
//!
//! ## Safety Model
//!
//! The maps are created from files opened read-only and are never remapped,
//! so `&[u8]` slices stay valid for the life of the `FileSource`. Callers
//! hold slices only while decoding; decoded structures own their data.
//!
//! ## Concurrency
//!
//! One `FileSource` belongs to one analysis instance and is accessed from
//! one thread. `Warnings` uses a `parking_lot::Mutex` so that read-only
//! decoding paths can record deviations through a shared reference.

mod file;

pub use file::FileSource;

use parking_lot::Mutex;

/// A single downgraded format deviation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Byte offset of the offending field, when known.
    pub offset: Option<u64>,
    pub detail: String,
}

/// Collector for deviations tolerated in non-strict mode.
///
/// Injected into decoders rather than registered globally, so concurrent
/// analyses of different files never share state.
#[derive(Debug, Default)]
pub struct Warnings {
    entries: Mutex<Vec<Warning>>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, offset: Option<u64>, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(?offset, "{detail}");
        self.entries.lock().push(Warning { offset, detail });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Warning> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_accumulate_and_snapshot() {
        let warnings = Warnings::new();
        assert!(warnings.is_empty());

        warnings.push(Some(21), "reserved space out of range");
        warnings.push(None, "stale page count");

        assert_eq!(warnings.len(), 2);
        let snapshot = warnings.snapshot();
        assert_eq!(snapshot[0].offset, Some(21));
        assert_eq!(snapshot[1].detail, "stale page count");
    }
}
