//! # Read-Only Source File Mapping
//!
//! The damaged database is opened read-only and mapped privately; pages
//! are borrowed `&[u8]` slices straight into the mapping, so nothing is
//! copied until a payload is reassembled into an owned buffer. The file
//! is never mutated and the mapping outlives every page slice (the borrow
//! checker ties slice lifetimes to the `SourceFile`).
//!
//! Page numbers are 1-based: page `pno` occupies bytes
//! `[(pno - 1) * 4096, pno * 4096)`. A trailing partial page, if the file
//! was truncated mid-page, is ignored.

use std::fs::File;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::{Mmap, MmapOptions};

use crate::config::PAGE_SIZE;

#[derive(Debug)]
pub struct SourceFile {
    mmap: Mmap,
    file_len: u64,
    page_count: u32,
}

impl SourceFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open source file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat source file '{}'", path.display()))?;

        let file_len = metadata.len();
        ensure!(
            file_len >= PAGE_SIZE as u64,
            "source file '{}' is {} bytes, smaller than one {}-byte page",
            path.display(),
            file_len,
            PAGE_SIZE
        );

        // SAFETY: the file is opened read-only and mapped privately, so
        // writes by other processes cannot reach this mapping. The mmap
        // lifetime is tied to SourceFile and all access goes through
        // page(), which bounds-checks the page number.
        let mmap = unsafe {
            MmapOptions::new()
                .map_copy_read_only(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let page_count = (file_len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            mmap,
            file_len,
            page_count,
        })
    }

    /// Borrows page `pno` (1-based) out of the mapping.
    pub fn page(&self, pno: u32) -> Result<&[u8]> {
        ensure!(
            pno >= 1 && pno <= self.page_count,
            "page {} out of bounds (file has {} pages)",
            pno,
            self.page_count
        );

        let offset = (pno as usize - 1) * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Hints the kernel that pages `[start_page, start_page + count)` are
    /// about to be read sequentially.
    pub fn prefetch(&self, start_page: u32, count: u32) {
        if start_page < 1 || start_page > self.page_count {
            return;
        }

        let end_page = (start_page + count).min(self.page_count + 1);
        let start_offset = (start_page as usize - 1) * PAGE_SIZE;
        let len = (end_page - start_page) as usize * PAGE_SIZE;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint and cannot corrupt
        // the mapping. start_page was bounds-checked above, end_page is
        // clamped to the page count, so the advised range stays inside
        // the mapping.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (start_offset, len);
    }
}
