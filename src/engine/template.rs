//! # Template Database Creation
//!
//! A template is the pre-initialized target the restore driver inserts
//! into: three pages, all carrying valid checksum trailers.
//!
//! ```text
//! page 1   database header (magic, page size, reserve size, version,
//!          root page) + the dual checksum required of page 1
//! page 2   filler, so the well-known index root lands on page 3
//! page 3   the empty index root (a leaf with zero cells)
//! ```
//!
//! The header occupies the first 24 bytes of page 1 and never grows into
//! the byte range where the default-page-size checksum lives (504..512).

use std::path::Path;

use eyre::{bail, ensure, Result};

use crate::codec::{CodecOp, PageChecksumCodec};
use crate::config::{
    FILE_MAGIC, FORMAT_VERSION, INDEX_ROOT_PAGE, PAGE_SIZE, RESERVED_BYTES, TEMPLATE_PAGE_COUNT,
    USABLE_SIZE,
};
use crate::format::{read_u16_be, read_u32_be, write_u16_be, write_u32_be, PageKind};

use super::pager::DbFile;

/// Parsed page-1 header of a template database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateHeader {
    pub page_size: u16,
    pub reserve_size: u8,
    pub version: u8,
    pub root_page: u32,
}

/// Reads and validates the page-1 header.
pub fn parse_header(page: &[u8]) -> Result<TemplateHeader> {
    ensure!(
        page.len() >= 24,
        "page 1 is {} bytes, too short for a header",
        page.len()
    );
    ensure!(
        page[..16] == FILE_MAGIC,
        "bad magic: this is not a template database"
    );

    let header = TemplateHeader {
        page_size: read_u16_be(page, 16),
        reserve_size: page[18],
        version: page[19],
        root_page: read_u32_be(page, 20),
    };

    ensure!(
        header.page_size as usize == PAGE_SIZE,
        "template page size {} is unsupported (expected {})",
        header.page_size,
        PAGE_SIZE
    );
    ensure!(
        header.reserve_size as usize == RESERVED_BYTES,
        "template reserve size {} is unsupported (expected {})",
        header.reserve_size,
        RESERVED_BYTES
    );
    ensure!(
        header.version == FORMAT_VERSION,
        "template format version {} is unsupported",
        header.version
    );
    ensure!(header.root_page >= 1, "template root page cannot be 0");

    Ok(header)
}

fn header_page() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[..16].copy_from_slice(&FILE_MAGIC);
    write_u16_be(&mut page, 16, PAGE_SIZE as u16);
    page[18] = RESERVED_BYTES as u8;
    page[19] = FORMAT_VERSION;
    write_u32_be(&mut page, 20, INDEX_ROOT_PAGE);
    page
}

fn empty_root_page() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = PageKind::LeafIndex.flag();
    write_u16_be(&mut page, 5, USABLE_SIZE as u16);
    page
}

/// Creates a fresh template database at `path`.
pub fn create_template<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        bail!(
            "refusing to overwrite existing file '{}'",
            path.display()
        );
    }

    let mut codec = PageChecksumCodec::new(path.display().to_string());
    codec.size_change(PAGE_SIZE, RESERVED_BYTES);

    let mut pages = [header_page(), vec![0u8; PAGE_SIZE], empty_root_page()];
    for (i, page) in pages.iter_mut().enumerate() {
        let pno = i as u32 + 1;
        if codec.apply(page, pno, CodecOp::WriteDbPage).is_none() {
            bail!("failed to stamp checksum on template page {}", pno);
        }
    }

    let mut db = DbFile::create(path, TEMPLATE_PAGE_COUNT)?;
    for (i, page) in pages.iter().enumerate() {
        db.page_mut(i as u32 + 1)?.copy_from_slice(page);
    }
    db.sync()?;

    Ok(())
}
