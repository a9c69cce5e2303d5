//! # Layout and Tuning Constants
//!
//! This module centralizes every on-disk layout constant and driver tuning
//! knob, grouping interdependent values together so a change in one place
//! cannot silently invalidate a derived value elsewhere.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> RESERVED_BYTES (8, trailing checksum words)
//!       │
//!       ├─> USABLE_SIZE (derived: PAGE_SIZE - RESERVED_BYTES)
//!       │         │
//!       │         ├─> MAX_LOCAL / MIN_LOCAL (payload locality thresholds,
//!       │         │     computed in `format`)
//!       │         │
//!       │         └─> OVERFLOW_CAPACITY (derived: USABLE_SIZE - link)
//!       │
//!       └─> DEFAULT_PAGE_SIZE (512, the engine's compiled-in default;
//!             page 1 must also verify at this length on a cold open)
//!
//! WAL_FRAME_HEADER_SIZE (32 bytes per frame)
//!       Each WAL frame = header + full page image (PAGE_SIZE bytes)
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `USABLE_SIZE == PAGE_SIZE - RESERVED_BYTES`
//! 2. `OVERFLOW_CAPACITY == USABLE_SIZE - OVERFLOW_LINK_SIZE`
//! 3. The locality thresholds evaluate to 1000/488 for the fixed geometry
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use sos::config::{PAGE_SIZE, USABLE_SIZE};
//! ```

// ============================================================================
// PAGE GEOMETRY
// These define the fixed on-disk layout shared by the source decoder and
// the engine's own pages.
// ============================================================================

/// Fixed page size of both the source file and the template database.
pub const PAGE_SIZE: usize = 4096;

/// Trailing bytes of every page reserved for the checksum pair.
pub const RESERVED_BYTES: usize = 8;

/// Bytes of each page available to the B-tree layer.
pub const USABLE_SIZE: usize = PAGE_SIZE - RESERVED_BYTES;

/// The engine's compiled-in default page size. Page 1 must be verifiable
/// at this length before the engine has parsed the real page size out of
/// the header, so writes of page 1 embed a second checksum at this offset.
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Second seed word for the page checksum (the first is the page number).
pub const CHECKSUM_SEED: u32 = 0x5ca1_ab1e;

/// Header length of an index leaf page (flag `0x0a`).
pub const LEAF_HEADER_SIZE: usize = 8;

/// Header length of an index interior page (flag `0x02`); bytes 8..12
/// hold the right-most child pointer.
pub const INTERIOR_HEADER_SIZE: usize = 12;

/// Leading bytes of an overflow page: the big-endian next-page link.
pub const OVERFLOW_LINK_SIZE: usize = 4;

/// Payload bytes one overflow page can carry.
pub const OVERFLOW_CAPACITY: usize = USABLE_SIZE - OVERFLOW_LINK_SIZE;

const _: () = assert!(USABLE_SIZE == PAGE_SIZE - RESERVED_BYTES);
const _: () = assert!(OVERFLOW_CAPACITY == USABLE_SIZE - OVERFLOW_LINK_SIZE);
const _: () = assert!(DEFAULT_PAGE_SIZE > RESERVED_BYTES);

// ============================================================================
// TEMPLATE DATABASE LAYOUT
// ============================================================================

/// Magic written at the start of page 1 of a template database.
pub const FILE_MAGIC: [u8; 16] = *b"sos db format 1\0";

/// Current template format version.
pub const FORMAT_VERSION: u8 = 1;

/// Root page of the template's single index. Page 1 is the database
/// header and page 2 is filler, so the well-known empty root is page 3.
pub const INDEX_ROOT_PAGE: u32 = 3;

/// Page count of a freshly created template.
pub const TEMPLATE_PAGE_COUNT: u32 = 3;

// ============================================================================
// WRITE-AHEAD LOG
// ============================================================================

/// Size of the frame header preceding each page image in the WAL.
pub const WAL_FRAME_HEADER_SIZE: usize = 32;

/// Size of one full WAL frame (header + page image).
pub const WAL_FRAME_SIZE: usize = WAL_FRAME_HEADER_SIZE + PAGE_SIZE;

// ============================================================================
// RESTORE DRIVER TUNING
// ============================================================================

/// Decoded source pages per write transaction before a commit is forced.
pub const DEFAULT_PAGES_PER_TXN: u32 = 1024;

/// Committed transactions between full WAL checkpoints.
pub const DEFAULT_TXNS_PER_CHECKPOINT: u32 = 10;

/// Upper bound on BUSY retries during a checkpoint before giving up.
pub const CHECKPOINT_RETRY_LIMIT: u32 = 1000;

/// Sleep between BUSY retries, in milliseconds.
pub const CHECKPOINT_RETRY_DELAY_MS: u64 = 10;

const _: () = assert!(((USABLE_SIZE - 12) * 64 / 255) - 23 == 1000);
const _: () = assert!(((USABLE_SIZE - 12) * 32 / 255) - 23 == 488);
