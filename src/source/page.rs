//! # Source Page View
//!
//! `SourcePage` is a borrowed, zero-copy view over one 4096-byte slice of
//! the source mapping. It classifies the page by its flag byte, parses
//! the index page header, and reads the cell pointer array. Everything
//! heavier (payload locality, overflow chains) lives in
//! [`payload`](super::payload).
//!
//! The view is deliberately permissive about content: a recognized flag
//! with a malformed header is an error the caller can log and skip, not a
//! panic. Unrecognized flags simply classify as `PageKind::Other`.

use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::config::{PAGE_SIZE, RESERVED_BYTES};
use crate::format::{read_u16_be, IndexPageHeader, PageKind};

/// Cell pointer arrays rarely exceed a few dozen entries for index pages
/// of this geometry; 64 inline slots keep the common case allocation-free.
pub type CellOffsets = SmallVec<[u16; 64]>;

#[derive(Debug, Clone, Copy)]
pub struct SourcePage<'a> {
    data: &'a [u8],
    pno: u32,
}

impl<'a> SourcePage<'a> {
    pub fn new(data: &'a [u8], pno: u32) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "page {} slice is {} bytes (expected {})",
            pno,
            data.len(),
            PAGE_SIZE
        );
        Ok(Self { data, pno })
    }

    pub fn pno(&self) -> u32 {
        self.pno
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn kind(&self) -> PageKind {
        PageKind::from_flag(self.data[0])
    }

    /// Parses the index page header; errors on non-index flags and on
    /// headers violating the pointer-array invariant.
    pub fn header(&self) -> Result<IndexPageHeader> {
        IndexPageHeader::parse(self.data)
    }

    /// Reads the big-endian cell pointer array that follows the header.
    pub fn cell_offsets(&self, header: &IndexPageHeader) -> Result<CellOffsets> {
        let header_size = header.header_size();
        let count = header.cell_count as usize;

        // The header invariant bounds the array against the cell region,
        // but a region offset of 65536 (stored 0) would still let the
        // array run off the physical page.
        ensure!(
            header_size + count * 2 <= PAGE_SIZE - RESERVED_BYTES,
            "cell pointer array ({} cells) runs past the usable page",
            count
        );

        let mut offsets = CellOffsets::with_capacity(count);
        for i in 0..count {
            offsets.push(read_u16_be(self.data, header_size + i * 2));
        }

        Ok(offsets)
    }
}
