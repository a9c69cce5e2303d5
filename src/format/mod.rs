//! # On-Disk Page Geometry
//!
//! Shared definitions for the checksummed B-tree page format: page kinds,
//! the index page header, cell-pointer access, and the payload locality
//! thresholds. Both the source-file decoder and the engine's B-tree build
//! on this module, so the reader and the writer cannot drift apart.
//!
//! ## Page Header Layout
//!
//! ```text
//! Offset  Size  Field               Notes
//! ------  ----  ------------------  --------------------------------
//! 0       1     flag                0x0a leaf index, 0x02 interior index
//! 1       2     free_block_offset   big-endian; 0 = no freeblocks
//! 3       2     cell_count          big-endian
//! 5       2     cell_region_offset  big-endian; 0 is read as 65536
//! 7       1     frag_bytes          fragmented free bytes
//! 8       4     right_child         interior pages only, big-endian
//! ```
//!
//! The cell pointer array (big-endian u16 offsets, one per cell) starts
//! immediately after the header: offset 8 on leaves, 12 on interiors.
//!
//! ## Payload Locality
//!
//! A payload of total size `P` keeps `local_size(P)` bytes on its home
//! page and spills the rest to an overflow chain:
//!
//! ```text
//! max_local = ((usable - 12) * 64 / 255) - 23
//! min_local = ((usable - 12) * 32 / 255) - 23
//! surplus   = min_local + (P - min_local) mod (usable - 4)
//! local     = P            if P <= max_local
//!             surplus      if surplus <= max_local
//!             min_local    otherwise
//! ```
//!
//! For the fixed 4088-byte usable size these evaluate to 1000 and 488;
//! `config` pins both with compile-time assertions.

use eyre::{bail, ensure, Result};
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    INTERIOR_HEADER_SIZE, LEAF_HEADER_SIZE, OVERFLOW_LINK_SIZE, PAGE_SIZE, USABLE_SIZE,
};

/// Flag byte of an index leaf page.
pub const FLAG_LEAF_INDEX: u8 = 0x0a;

/// Flag byte of an index interior page.
pub const FLAG_INTERIOR_INDEX: u8 = 0x02;

/// Most payload bytes an index cell may keep on its home page.
pub const MAX_LOCAL: usize = max_local(USABLE_SIZE);

/// Fewest local payload bytes of a spilled index cell.
pub const MIN_LOCAL: usize = min_local(USABLE_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    LeafIndex,
    InteriorIndex,
    Other,
}

impl PageKind {
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            FLAG_LEAF_INDEX => PageKind::LeafIndex,
            FLAG_INTERIOR_INDEX => PageKind::InteriorIndex,
            _ => PageKind::Other,
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            PageKind::LeafIndex => FLAG_LEAF_INDEX,
            PageKind::InteriorIndex => FLAG_INTERIOR_INDEX,
            PageKind::Other => 0,
        }
    }

    pub fn is_index(self) -> bool {
        !matches!(self, PageKind::Other)
    }

    pub fn header_size(self) -> usize {
        match self {
            PageKind::InteriorIndex => INTERIOR_HEADER_SIZE,
            _ => LEAF_HEADER_SIZE,
        }
    }
}

/// Wire image of the common header fields. `right_child` is read
/// separately because it exists only on interior pages.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RawPageHeader {
    pub flag: u8,
    pub free_block_offset: U16<BigEndian>,
    pub cell_count: U16<BigEndian>,
    pub cell_region_offset: U16<BigEndian>,
    pub frag_bytes: u8,
}

const _: () = assert!(size_of::<RawPageHeader>() == LEAF_HEADER_SIZE);

/// Parsed, validated index page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPageHeader {
    pub kind: PageKind,
    pub free_block_offset: u16,
    pub cell_count: u16,
    /// Decoded region offset; a stored 0 is read as 65536.
    pub cell_region_offset: u32,
    pub frag_bytes: u8,
    /// Right-most child pointer, interior pages only.
    pub right_child: Option<u32>,
}

impl IndexPageHeader {
    /// Parses and validates the header of an already-classified index
    /// page. Fails on non-index flags and on headers whose cell pointer
    /// array would overlap the cell content region.
    pub fn parse(page: &[u8]) -> Result<Self> {
        ensure!(
            page.len() == PAGE_SIZE,
            "invalid page length {} (expected {})",
            page.len(),
            PAGE_SIZE
        );

        let raw = RawPageHeader::ref_from_bytes(&page[..LEAF_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read page header: {:?}", e))?;

        let kind = PageKind::from_flag(raw.flag);
        if !kind.is_index() {
            bail!("flag {:#04x} is not an index page", raw.flag);
        }

        let cell_region_offset = match raw.cell_region_offset.get() {
            0 => 65536,
            n => n as u32,
        };

        let header_size = kind.header_size();
        ensure!(
            raw.cell_count.get() as u32 * 2 + header_size as u32 <= cell_region_offset,
            "cell pointer array ({} cells after {}-byte header) overlaps cell region at {}",
            raw.cell_count.get(),
            header_size,
            cell_region_offset
        );

        let right_child = match kind {
            PageKind::InteriorIndex => Some(read_u32_be(page, 8)),
            _ => None,
        };

        Ok(Self {
            kind,
            free_block_offset: raw.free_block_offset.get(),
            cell_count: raw.cell_count.get(),
            cell_region_offset,
            frag_bytes: raw.frag_bytes,
            right_child,
        })
    }

    pub fn header_size(&self) -> usize {
        self.kind.header_size()
    }
}

impl std::fmt::Display for IndexPageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flag: {:#04x} free_block_offset: {} number_of_cell: {} \
             cell_region_offset: {} number_of_free_bytes: {}",
            self.kind.flag(),
            self.free_block_offset,
            self.cell_count,
            self.cell_region_offset,
            self.frag_bytes
        )
    }
}

pub const fn max_local(usable: usize) -> usize {
    (usable - 12) * 64 / 255 - 23
}

pub const fn min_local(usable: usize) -> usize {
    (usable - 12) * 32 / 255 - 23
}

/// Bytes of a `payload_size`-byte payload stored on the home page.
pub fn local_size(payload_size: u64, usable: usize) -> usize {
    let maxl = max_local(usable) as u64;
    if payload_size <= maxl {
        return payload_size as usize;
    }

    let minl = min_local(usable) as u64;
    let surplus = minl + (payload_size - minl) % (usable as u64 - OVERFLOW_LINK_SIZE as u64);
    if surplus <= maxl {
        surplus as usize
    } else {
        minl as usize
    }
}

#[inline]
pub fn read_u16_be(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub fn read_u32_be(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
pub fn write_u16_be(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_u32_be(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}
