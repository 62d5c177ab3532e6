//! # SQLite On-Disk Format Constants
//!
//! All fixed sizes, magic values and type discriminators of the SQLite file
//! family. Values follow the file-format documentation and were verified
//! against real database, WAL, journal and shm files.
//!
//! ## Dependency Graph
//!
//! ```text
//! DB_HEADER_SIZE (100 bytes)
//!       │
//!       ├─> page 1 b-tree header starts at offset 100
//!       └─> page 1 byte accounting subtracts 100
//!
//! PAGE_SIZE range [512, 65536], power of two
//!       │
//!       ├─> stored as u16 at offset 16; raw value 1 means 65536
//!       ├─> usable size U = page_size - reserved_space
//!       │     ├─> table-leaf inline cap  X = U - 35
//!       │     ├─> index inline cap       X = ((U-12)*64)/255 - 23
//!       │     └─> minimum inline         M = ((U-12)*32)/255 - 23
//!       └─> pointer-map entries per page = U / 5
//!
//! WAL_HEADER_SIZE (32) + n * (WAL_FRAME_HEADER_SIZE (24) + page_size)
//!       └─> frame offsets are exact; a short tail is ignored
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DB_MAGIC` is exactly 16 bytes including the trailing NUL
//! 2. B-tree page type bytes are the only valid first bytes of a b-tree page
//! 3. A freeblock is at least `FREEBLOCK_HEADER_SIZE` (4) bytes; smaller
//!    gaps are fragments

/// Size of the database file header on page 1.
pub const DB_HEADER_SIZE: usize = 100;

/// Magic string at offset 0 of every SQLite database file.
pub const DB_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Smallest legal page size.
pub const MIN_PAGE_SIZE: u32 = 512;

/// Largest legal page size. Stored in the header as the sentinel value 1.
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Raw header value meaning `MAX_PAGE_SIZE`.
pub const PAGE_SIZE_SENTINEL: u16 = 1;

/// Required maximum embedded payload fraction (header offset 21).
pub const MAX_EMBEDDED_PAYLOAD_FRACTION: u8 = 64;

/// Required minimum embedded payload fraction (header offset 22).
pub const MIN_EMBEDDED_PAYLOAD_FRACTION: u8 = 32;

/// Required leaf payload fraction (header offset 23).
pub const LEAF_PAYLOAD_FRACTION: u8 = 32;

/// Highest schema format number understood by SQLite.
pub const MAX_SCHEMA_FORMAT: u32 = 4;

// ============================================================================
// B-TREE PAGE LAYOUT
// ============================================================================

/// B-tree page type discriminators (first byte of the b-tree header).
pub const INDEX_INTERIOR_PAGE_TYPE: u8 = 0x02;
pub const TABLE_INTERIOR_PAGE_TYPE: u8 = 0x05;
pub const INDEX_LEAF_PAGE_TYPE: u8 = 0x0a;
pub const TABLE_LEAF_PAGE_TYPE: u8 = 0x0d;

/// B-tree header size on leaf pages.
pub const LEAF_PAGE_HEADER_SIZE: usize = 8;

/// B-tree header size on interior pages (adds the right-most pointer).
pub const INTERIOR_PAGE_HEADER_SIZE: usize = 12;

/// Bytes per entry in the cell pointer array.
pub const CELL_POINTER_SIZE: usize = 2;

/// A freeblock's on-page header: next-freeblock offset + size, both u16.
pub const FREEBLOCK_HEADER_SIZE: usize = 4;

/// Free gaps smaller than a freeblock header are tracked as fragments.
pub const MAX_FRAGMENT_SIZE: usize = FREEBLOCK_HEADER_SIZE - 1;

/// Raw cell-content-start value meaning 65536.
pub const CELL_CONTENT_START_SENTINEL: u16 = 0;

/// First four bytes of an overflow page: the next overflow page number.
pub const OVERFLOW_HEADER_SIZE: usize = 4;

/// Bytes per pointer-map entry: type byte + parent page number.
pub const POINTER_MAP_ENTRY_SIZE: usize = 5;

/// Pointer-map entry types.
pub const PTRMAP_ROOT_PAGE: u8 = 1;
pub const PTRMAP_FREE_PAGE: u8 = 2;
pub const PTRMAP_FIRST_OVERFLOW: u8 = 3;
pub const PTRMAP_FURTHER_OVERFLOW: u8 = 4;
pub const PTRMAP_BTREE_NON_ROOT: u8 = 5;

const _: () = assert!(LEAF_PAGE_HEADER_SIZE + 4 == INTERIOR_PAGE_HEADER_SIZE);
const _: () = assert!(MAX_FRAGMENT_SIZE < FREEBLOCK_HEADER_SIZE);

// ============================================================================
// RECORD FORMAT
// ============================================================================

/// Largest varint encoding in bytes.
pub const MAX_VARINT_SIZE: usize = 9;

/// Serial types 10 and 11 are reserved and never written by SQLite.
pub const RESERVED_SERIAL_TYPE_10: u64 = 10;
pub const RESERVED_SERIAL_TYPE_11: u64 = 11;

/// First BLOB serial type; even values >= this are blobs of (n-12)/2 bytes.
pub const BLOB_SERIAL_TYPE_BASE: u64 = 12;

/// First TEXT serial type; odd values >= this are text of (n-13)/2 bytes.
pub const TEXT_SERIAL_TYPE_BASE: u64 = 13;

/// Text encodings from database header offset 56.
pub const TEXT_ENCODING_UTF8: u32 = 1;
pub const TEXT_ENCODING_UTF16LE: u32 = 2;
pub const TEXT_ENCODING_UTF16BE: u32 = 3;

// ============================================================================
// WRITE-AHEAD LOG
// ============================================================================

/// Size of the WAL file header.
pub const WAL_HEADER_SIZE: usize = 32;

/// Size of each WAL frame header.
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

/// WAL magic for little-endian checksums.
pub const WAL_MAGIC_LITTLE_ENDIAN: u32 = 0x377f0682;

/// WAL magic for big-endian checksums.
pub const WAL_MAGIC_BIG_ENDIAN: u32 = 0x377f0683;

/// The only WAL file-format version ever shipped.
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;

// ============================================================================
// ROLLBACK JOURNAL
// ============================================================================

/// Rollback journal header magic.
pub const JOURNAL_MAGIC: [u8; 8] = [0xd9, 0xd5, 0x05, 0xf9, 0x20, 0xa1, 0x63, 0xd7];

/// Size of the rollback journal header fields carvedb reads.
pub const JOURNAL_HEADER_SIZE: usize = 28;

/// Journal page-count value meaning "unknown / all following records".
pub const JOURNAL_PAGE_COUNT_SENTINEL: u32 = 0xffff_ffff;

// ============================================================================
// WAL-INDEX (SHM)
// ============================================================================

/// Size of one copy of the WAL-index information header.
pub const WAL_INDEX_HEADER_COPY_SIZE: usize = 48;

/// The WAL-index holds two identical header copies for lock-free reads.
pub const WAL_INDEX_HEADER_SIZE: usize = 2 * WAL_INDEX_HEADER_COPY_SIZE;

/// Size of the checkpoint information block that follows the header copies.
pub const WAL_INDEX_CHECKPOINT_INFO_SIZE: usize = 24;

/// Number of reader marks in the checkpoint information block.
pub const WAL_INDEX_READER_MARK_COUNT: usize = 5;

/// WAL-index format version (tracks the WAL format version).
pub const WAL_INDEX_FORMAT_VERSION: u32 = 3_007_000;

// ============================================================================
// VERSION MODEL
// ============================================================================

/// Version number of the base database snapshot; WAL commit records count
/// up from here.
pub const BASE_VERSION_NUMBER: u32 = 0;

/// Page number sentinel meaning "no page".
pub const NO_PAGE: u32 = 0;
