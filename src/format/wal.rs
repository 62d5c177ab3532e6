//! # Write-Ahead Log Reader
//!
//! Decodes a WAL companion file into its header and frame sequence and
//! groups committed frames into commit records.
//!
//! ## Layout
//!
//! ```text
//! +--------------------+
//! | WAL header (32B)   |
//! +--------------------+
//! | frame header (24B) |
//! | page image         |  <- page_size bytes
//! +--------------------+
//! | frame header (24B) |
//! | ...                |
//! ```
//!
//! WAL header fields (all u32 big-endian): magic, format version (3007000),
//! page size, checkpoint sequence, salt-1, salt-2, checksum-1, checksum-2.
//! The magic's low bit selects the byte order used by the *checksum* words:
//! `0x377f0682` little-endian, `0x377f0683` big-endian.
//!
//! Frame header fields: page number, database size in pages after commit
//! (nonzero marks a commit frame), salt-1, salt-2, checksum-1, checksum-2.
//!
//! ## Frame Validity
//!
//! A frame is valid when its salts equal the WAL header salts and the
//! cumulative checksum chain (seeded by the header checksum, extended by
//! the first 8 bytes of each frame header and the page image) matches the
//! frame's stored checksum. The first invalid frame ends the valid prefix;
//! everything after it is stale content from before a checkpoint restart.
//!
//! ## Commit Grouping
//!
//! Valid frames are grouped into commit records: a run of frames ending at
//! a commit frame forms one record. Valid frames after the last commit
//! frame belong to no commit; they are kept as a trailing segment and
//! reported with a warning, never synthesized into a version.

use zerocopy::big_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::be_getters;
use crate::config::{
    WAL_FORMAT_VERSION, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE, WAL_MAGIC_BIG_ENDIAN,
    WAL_MAGIC_LITTLE_ENDIAN,
};
use crate::errors::VersionError;
use crate::storage::{FileSource, Warnings};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
struct RawWalHeader {
    magic: U32,
    format_version: U32,
    page_size: U32,
    checkpoint_sequence: U32,
    salt_1: U32,
    salt_2: U32,
    checksum_1: U32,
    checksum_2: U32,
}

const _: () = assert!(std::mem::size_of::<RawWalHeader>() == WAL_HEADER_SIZE);

impl RawWalHeader {
    be_getters! {
        magic: u32,
        format_version: u32,
        page_size: u32,
        checkpoint_sequence: u32,
        salt_1: u32,
        salt_2: u32,
        checksum_1: u32,
        checksum_2: u32,
    }
}

/// Decoded WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    /// Checksum words are read big-endian when the magic's low bit is set.
    pub big_endian_checksum: bool,
    pub format_version: u32,
    pub page_size: u32,
    pub checkpoint_sequence: u32,
    pub salt_1: u32,
    pub salt_2: u32,
    pub checksum_1: u32,
    pub checksum_2: u32,
}

impl WalHeader {
    pub fn parse(bytes: &[u8], strict: bool, warnings: &Warnings) -> Result<Self, VersionError> {
        let raw = RawWalHeader::ref_from_bytes(bytes.get(..WAL_HEADER_SIZE).ok_or_else(|| {
            VersionError::Wal {
                detail: "file shorter than the 32-byte WAL header".into(),
            }
        })?)
        .map_err(|_| VersionError::Wal {
            detail: "header window rejected by layout validation".into(),
        })?;

        let big_endian_checksum = match raw.magic() {
            WAL_MAGIC_LITTLE_ENDIAN => false,
            WAL_MAGIC_BIG_ENDIAN => true,
            other => {
                return Err(VersionError::Wal {
                    detail: format!("bad WAL magic {other:#010x}"),
                })
            }
        };

        if raw.format_version() != WAL_FORMAT_VERSION {
            let detail = format!(
                "WAL format version {} (expected {WAL_FORMAT_VERSION})",
                raw.format_version()
            );
            if strict {
                return Err(VersionError::Wal { detail });
            }
            warnings.push(Some(4), detail);
        }

        let header = Self {
            magic: raw.magic(),
            big_endian_checksum,
            format_version: raw.format_version(),
            page_size: raw.page_size(),
            checkpoint_sequence: raw.checkpoint_sequence(),
            salt_1: raw.salt_1(),
            salt_2: raw.salt_2(),
            checksum_1: raw.checksum_1(),
            checksum_2: raw.checksum_2(),
        };

        let computed = checksum_step(
            (0, 0),
            &bytes[..WAL_HEADER_SIZE - 8],
            big_endian_checksum,
        );
        if computed != (header.checksum_1, header.checksum_2) {
            warnings.push(Some(24), "WAL header checksum mismatch".to_string());
        }

        Ok(header)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
struct RawWalFrameHeader {
    page_number: U32,
    db_size_after_commit: U32,
    salt_1: U32,
    salt_2: U32,
    checksum_1: U32,
    checksum_2: U32,
}

const _: () = assert!(std::mem::size_of::<RawWalFrameHeader>() == WAL_FRAME_HEADER_SIZE);

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalFrameHeader {
    pub page_number: u32,
    /// Nonzero marks a commit frame and carries the new database size.
    pub db_size_after_commit: u32,
    pub salt_1: u32,
    pub salt_2: u32,
    pub checksum_1: u32,
    pub checksum_2: u32,
}

impl WalFrameHeader {
    pub fn is_commit(&self) -> bool {
        self.db_size_after_commit != 0
    }
}

/// One valid WAL frame: header plus the location of its page image.
#[derive(Debug, Clone, Copy)]
pub struct WalFrame {
    /// Zero-based index in the physical frame sequence.
    pub index: usize,
    pub header: WalFrameHeader,
    /// Offset of the page image within the WAL file.
    pub data_offset: u64,
    /// One-based commit record this frame belongs to; `None` for trailing
    /// frames after the last commit.
    pub commit_number: Option<u32>,
}

/// A parsed WAL file: the valid frame prefix, commit grouping, and counts
/// of what was left unused.
#[derive(Debug)]
pub struct Wal {
    pub header: WalHeader,
    pub frames: Vec<WalFrame>,
    /// Indices into `frames` of each commit frame, in order.
    pub commit_frame_indices: Vec<usize>,
    /// Valid frames after the last commit frame (never versioned).
    pub trailing_frame_count: usize,
    /// Stale frames after the valid prefix (salt or checksum mismatch).
    pub invalid_frame_count: usize,
}

impl Wal {
    /// Parses a WAL file, validating the frame chain.
    pub fn parse(
        source: &FileSource,
        strict: bool,
        warnings: &Warnings,
    ) -> Result<Self, VersionError> {
        let header_bytes =
            source
                .slice(0, WAL_HEADER_SIZE)
                .map_err(|_| VersionError::Wal {
                    detail: "file shorter than the 32-byte WAL header".into(),
                })?;
        let header = WalHeader::parse(header_bytes, strict, warnings)?;

        if header.page_size == 0 || !header.page_size.is_power_of_two() {
            return Err(VersionError::Wal {
                detail: format!("invalid WAL page size {}", header.page_size),
            });
        }

        let frame_size = WAL_FRAME_HEADER_SIZE as u64 + u64::from(header.page_size);
        let body = source.len().saturating_sub(WAL_HEADER_SIZE as u64);
        let frame_count = (body / frame_size) as usize;
        if body % frame_size != 0 {
            warnings.push(
                Some(source.len()),
                format!(
                    "{} trailing bytes after frame {frame_count} ignored",
                    body % frame_size
                ),
            );
        }

        let mut frames = Vec::with_capacity(frame_count);
        let mut commit_frame_indices = Vec::new();
        let mut running = (header.checksum_1, header.checksum_2);
        let mut commit_number: u32 = 1;
        let mut invalid_frame_count = 0;

        for index in 0..frame_count {
            let frame_offset = WAL_HEADER_SIZE as u64 + index as u64 * frame_size;
            let header_bytes = source
                .slice(frame_offset, WAL_FRAME_HEADER_SIZE)
                .map_err(|_| VersionError::WalFrame {
                    frame_index: index,
                    detail: "frame header past end of file".into(),
                })?;
            let raw = RawWalFrameHeader::ref_from_bytes(header_bytes).map_err(|_| {
                VersionError::WalFrame {
                    frame_index: index,
                    detail: "frame header window rejected by layout validation".into(),
                }
            })?;

            let frame_header = WalFrameHeader {
                page_number: raw.page_number.get(),
                db_size_after_commit: raw.db_size_after_commit.get(),
                salt_1: raw.salt_1.get(),
                salt_2: raw.salt_2.get(),
                checksum_1: raw.checksum_1.get(),
                checksum_2: raw.checksum_2.get(),
            };

            if frame_header.salt_1 != header.salt_1 || frame_header.salt_2 != header.salt_2 {
                // Stale content from before a checkpoint restart; the valid
                // prefix ends here.
                invalid_frame_count = frame_count - index;
                tracing::debug!(
                    frame = index,
                    "frame salt mismatch ends the valid prefix"
                );
                break;
            }

            let data_offset = frame_offset + WAL_FRAME_HEADER_SIZE as u64;
            let data = source
                .slice(data_offset, header.page_size as usize)
                .map_err(|_| VersionError::WalFrame {
                    frame_index: index,
                    detail: "frame page image past end of file".into(),
                })?;

            running = checksum_step(running, &header_bytes[..8], header.big_endian_checksum);
            running = checksum_step(running, data, header.big_endian_checksum);
            if running != (frame_header.checksum_1, frame_header.checksum_2) {
                invalid_frame_count = frame_count - index;
                tracing::debug!(frame = index, "frame checksum mismatch ends the valid prefix");
                break;
            }

            if frame_header.page_number == 0 {
                return Err(VersionError::WalFrame {
                    frame_index: index,
                    detail: "frame targets page 0".into(),
                });
            }

            let is_commit = frame_header.is_commit();
            frames.push(WalFrame {
                index,
                header: frame_header,
                data_offset,
                commit_number: Some(commit_number),
            });
            if is_commit {
                commit_frame_indices.push(frames.len() - 1);
                commit_number += 1;
            }
        }

        // Frames past the last commit never became durable; keep them
        // visible but unversioned.
        let trailing_start = commit_frame_indices
            .last()
            .map(|&i| i + 1)
            .unwrap_or(0);
        let trailing_frame_count = frames.len() - trailing_start;
        for frame in &mut frames[trailing_start..] {
            frame.commit_number = None;
        }
        if trailing_frame_count > 0 {
            warnings.push(
                None,
                format!(
                    "WAL ends with {trailing_frame_count} valid frame(s) after the last commit frame; they are not part of any version"
                ),
            );
        }

        Ok(Self {
            header,
            frames,
            commit_frame_indices,
            trailing_frame_count,
            invalid_frame_count,
        })
    }

    /// Number of commit records in the WAL.
    pub fn commit_count(&self) -> usize {
        self.commit_frame_indices.len()
    }

    /// The frames of one-based commit record `commit_number`, ending with
    /// its commit frame.
    pub fn frames_for_commit(&self, commit_number: u32) -> &[WalFrame] {
        let commit_index = (commit_number - 1) as usize;
        let end = self.commit_frame_indices[commit_index] + 1;
        let start = if commit_index == 0 {
            0
        } else {
            self.commit_frame_indices[commit_index - 1] + 1
        };
        &self.frames[start..end]
    }
}

/// Advances the cumulative WAL checksum over `data` (length a multiple of
/// 8), reading u32 words in the byte order selected by the WAL magic.
pub fn checksum_step(state: (u32, u32), data: &[u8], big_endian: bool) -> (u32, u32) {
    let (mut s1, mut s2) = state;
    for chunk in data.chunks_exact(8) {
        let x1 = if big_endian {
            u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        } else {
            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        };
        let x2 = if big_endian {
            u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]])
        } else {
            u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]])
        };
        s1 = s1.wrapping_add(x1).wrapping_add(s2);
        s2 = s2.wrapping_add(x2).wrapping_add(s1);
    }
    (s1, s2)
}
