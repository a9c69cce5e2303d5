//! # Page Checksum Codec
//!
//! Every page of the template database carries an 8-byte trailer holding
//! two little-endian u32 checksum words. The codec is attached to the
//! engine's pager and invoked on every page I/O: writes compute the
//! checksum and embed it in the trailer, reads recompute it into scratch
//! and compare. A mismatch is reported to the pager as a failure sentinel
//! (`None`), which the engine surfaces as a corrupt-page error.
//!
//! ## Checksum
//!
//! For a page of length `page_len`, the checksum covers bytes
//! `[0, page_len - 8)` and seeds the two-word hash with
//! `(page_number, 0x5ca1ab1e)`. The hash output pair overwrites the
//! trailer on write and is compared against it on read.
//!
//! ## Page 1
//!
//! Page 1 contains the page-size and reserve-size fields the engine needs
//! before it has told the codec what those are. On a cold open the engine
//! can only verify page 1 as a `DEFAULT_PAGE_SIZE`-byte page, so writes of
//! page 1 with a larger configured page size first embed a checksum
//! computed at the default length (trailer at bytes 504..512) and then
//! the real-size checksum over the full page. A configured page size
//! below the default is undefined behavior, as in the original format.
//!
//! For every page other than 1 the codec refuses to operate unless the
//! reserve size equals the trailer size; anything else means the pager
//! and the codec disagree about the page layout and no checksum offset
//! can be trusted.
//!
//! ## Ownership
//!
//! The pager owns the codec for the lifetime of the database connection;
//! the original's C-style `free` hook is the codec's `Drop`.

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{CHECKSUM_SEED, DEFAULT_PAGE_SIZE};
use crate::hash::hash2;

/// Pager operation the codec is being invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOp {
    ReadPage,
    WriteDbPage,
    WriteJournalPage,
}

impl CodecOp {
    fn is_write(self) -> bool {
        matches!(self, CodecOp::WriteDbPage | CodecOp::WriteJournalPage)
    }
}

/// The two trailer words, little-endian on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageSum {
    pub part1: U32<LittleEndian>,
    pub part2: U32<LittleEndian>,
}

pub const SUM_SIZE: usize = size_of::<PageSum>();

const _: () = assert!(SUM_SIZE == crate::config::RESERVED_BYTES);

#[derive(Debug)]
pub struct PageChecksumCodec {
    page_size: usize,
    reserve_size: usize,
    filename: String,
    silent: bool,
}

impl PageChecksumCodec {
    /// A fresh codec knows nothing about the page geometry; the engine
    /// announces it through [`size_change`](Self::size_change) once it
    /// has parsed page 1.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            page_size: 0,
            reserve_size: 0,
            filename: filename.into(),
            silent: false,
        }
    }

    /// Suppresses mismatch diagnostics (used by tests that tamper on
    /// purpose).
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Resize hook: the engine calls this after parsing page 1 (and on
    /// any later geometry change).
    pub fn size_change(&mut self, new_page_size: usize, new_reserve_size: usize) {
        self.page_size = new_page_size;
        self.reserve_size = new_reserve_size;
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Computes and then either stores or verifies a checksum over a
    /// `page_len`-byte prefix of `data`. The trailer lives at
    /// `page_len - 8`. Returns whether the page passed (always true in
    /// write mode).
    fn checksum(&self, page_no: u32, data: &mut [u8], page_len: usize, write: bool) -> bool {
        let data_len = page_len - SUM_SIZE;
        let (part1, part2) = hash2(&data[..data_len], page_no, CHECKSUM_SEED);

        let computed = PageSum {
            part1: U32::new(part1),
            part2: U32::new(part2),
        };

        let in_page = PageSum::mut_from_bytes(&mut data[data_len..page_len])
            .expect("trailer slice is exactly SUM_SIZE bytes");

        if write {
            *in_page = computed;
            return true;
        }

        computed == *in_page
    }

    /// The pager hook: produce a checksum on write operations, verify on
    /// reads. `None` is the failure sentinel the pager treats as a
    /// corrupt page.
    pub fn apply(&self, data: &mut [u8], page_no: u32, op: CodecOp) -> Option<()> {
        let write = op.is_write();

        debug_assert!(data.len() >= self.page_size);

        if page_no == 1 {
            // Page 1 must also verify as a DEFAULT_PAGE_SIZE page so a
            // cold open can check it before learning the true size.
            if write && self.page_size > DEFAULT_PAGE_SIZE {
                self.checksum(page_no, data, DEFAULT_PAGE_SIZE, true);
            }
        } else if self.reserve_size != SUM_SIZE {
            return None;
        }

        if !self.checksum(page_no, data, self.page_size, write) {
            if !self.silent {
                println!(
                    "checksum mismatch on page {} of {} (page size {})",
                    page_no, self.filename, self.page_size
                );
            }
            return None;
        }

        Some(())
    }
}
