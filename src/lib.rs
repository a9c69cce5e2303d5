//! # sos — Salvage-and-Rebuild for Checksummed B-Tree Database Files
//!
//! `sos` is an offline recovery tool for a damaged or partial embedded
//! database file whose overall structure may be ruined but whose
//! individual index pages are still parsable. It walks the source file
//! page by page, decodes every index leaf and index interior page it
//! recognizes, reassembles the key payloads (following overflow chains),
//! and inserts them into a fresh template database through the embedded
//! engine's cursor API — committing in bounded batches and periodically
//! checkpointing the write-ahead log.
//!
//! ## Quick Start
//!
//! ```bash
//! # Prepare an empty target
//! sos --create-template template.db
//!
//! # Salvage everything from page 2 onward
//! sos damaged.db template.db 2
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          CLI (src/bin/sos.rs)           │
//! ├─────────────────────────────────────────┤
//! │        Restore Driver (restore)         │
//! ├──────────────────────┬──────────────────┤
//! │   Source Decoder     │  Engine Adapter  │
//! │   (source: mmap,     │  (engine: tx,    │
//! │    pages, payloads)  │   cursor, WAL)   │
//! ├──────────────────────┼──────────────────┤
//! │  Shared Geometry (format, encoding)     │
//! ├─────────────────────────────────────────┤
//! │  Checksum Codec (codec) + Hash (hash)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The decoder side is **permissive**: broken cells and undecodable
//! headers are logged and skipped so one bad byte never aborts a
//! salvage. The engine side is **strict**: any surprise from the
//! template database — including a checksum mismatch surfaced by the
//! page codec — is fatal.
//!
//! ## On-Disk Format
//!
//! Both the source file and the template use fixed 4096-byte pages whose
//! last 8 bytes hold a two-word checksum seeded with the page number.
//! Index pages carry a flag byte (`0x0a` leaf, `0x02` interior), a
//! big-endian cell pointer array, and cells whose payloads spill into
//! singly-linked overflow chains past a geometry-derived threshold. The
//! engine writes the same format the decoder reads, so a rebuilt
//! database is itself salvageable.
//!
//! ## Module Overview
//!
//! - [`config`]: layout constants and driver tuning knobs
//! - [`encoding`]: the format's 1–9-byte big-endian varint
//! - [`hash`]: the lookup3 two-word page hash
//! - [`codec`]: the per-page checksum codec installed into the pager
//! - [`format`]: page kinds, headers, and payload locality thresholds
//! - [`source`]: read-only mmap, page views, payload reassembly
//! - [`engine`]: pager, WAL, index B-tree, template creation
//! - [`restore`]: the batched salvage driver and its metrics

pub mod codec;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod format;
pub mod hash;
pub mod restore;
pub mod source;

pub use restore::{restore, Metrics, RestoreConfig};
