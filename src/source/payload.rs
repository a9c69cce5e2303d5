//! # Payload Extraction
//!
//! Reassembles one cell's key payload out of a source page, following the
//! overflow chain when the payload spills past its home page. The
//! extractor is deliberately permissive: every way a cell can be broken
//! maps to a typed [`CellSkip`] reason the driver logs before moving on
//! to the next cell. Nothing in this module aborts a run.
//!
//! ## Cell Layout
//!
//! ```text
//! leaf:      varint(P) ‖ payload[..local] ‖ [first overflow page, 4B BE]
//! interior:  left child (4B BE) ‖ varint(P) ‖ payload[..local] ‖ [overflow]
//! ```
//!
//! The trailing overflow pointer exists only when `P` exceeds
//! `local_size(P)`. Overflow pages hold a 4-byte big-endian next link
//! (0 terminates) followed by up to `usable - 4` payload bytes.
//!
//! ## Validity
//!
//! A payload is invalid when the cell offset leaves
//! `[header_size, usable)`, the varint or local region is truncated, the
//! declared size is zero or exceeds what the file could physically supply
//! (local bytes plus one full overflow page per page in the file — the
//! chain visits each page at most once), or the chain ends before the
//! buffer fills. The chain walk is bounded by the file's page count, so a
//! cyclic chain terminates with a broken-chain verdict instead of looping.

use hashbrown::HashSet;

use crate::config::{OVERFLOW_CAPACITY, OVERFLOW_LINK_SIZE, USABLE_SIZE};
use crate::encoding::decode_varint;
use crate::format::{local_size, read_u32_be, PageKind};

use super::file::SourceFile;
use super::page::SourcePage;

/// Why a cell was skipped. Diagnostic only; the page keeps decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellSkip {
    OffsetOutOfRange { offset: u16 },
    TruncatedCell { offset: u16 },
    EmptyPayload,
    OversizedPayload { declared: u64, limit: u64 },
    BrokenChain { declared: u64, reassembled: u64 },
}

impl std::fmt::Display for CellSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellSkip::OffsetOutOfRange { offset } => {
                write!(f, "cell offset {} outside the usable page", offset)
            }
            CellSkip::TruncatedCell { offset } => {
                write!(f, "cell at offset {} is truncated", offset)
            }
            CellSkip::EmptyPayload => write!(f, "payload size is zero"),
            CellSkip::OversizedPayload { declared, limit } => write!(
                f,
                "declared payload size {} exceeds what the file can supply ({})",
                declared, limit
            ),
            CellSkip::BrokenChain {
                declared,
                reassembled,
            } => write!(
                f,
                "overflow chain ended after {} of {} bytes",
                reassembled, declared
            ),
        }
    }
}

/// Reassembles the payload of the cell at `cell_offset` on `page`.
pub fn extract_payload(
    file: &SourceFile,
    page: &SourcePage<'_>,
    kind: PageKind,
    cell_offset: u16,
) -> Result<Vec<u8>, CellSkip> {
    let data = page.data();
    let header_size = kind.header_size();

    let mut pos = cell_offset as usize;
    if pos < header_size || pos >= USABLE_SIZE {
        return Err(CellSkip::OffsetOutOfRange {
            offset: cell_offset,
        });
    }

    if kind == PageKind::InteriorIndex {
        // Skip the left-child pointer that precedes the size varint.
        pos += OVERFLOW_LINK_SIZE;
        if pos >= USABLE_SIZE {
            return Err(CellSkip::TruncatedCell {
                offset: cell_offset,
            });
        }
    }

    let (declared, varint_len) = match decode_varint(&data[pos..USABLE_SIZE]) {
        Ok(decoded) => decoded,
        Err(_) => {
            return Err(CellSkip::TruncatedCell {
                offset: cell_offset,
            })
        }
    };
    pos += varint_len;

    if declared == 0 {
        return Err(CellSkip::EmptyPayload);
    }

    let local = local_size(declared, USABLE_SIZE);

    // The chain visits each page of the file at most once, so the file
    // bounds how large a genuine payload can be. Checking before the
    // allocation also keeps a corrupt varint from requesting gigabytes.
    let limit = local as u64 + file.page_count() as u64 * OVERFLOW_CAPACITY as u64;
    if declared > limit {
        return Err(CellSkip::OversizedPayload { declared, limit });
    }

    if pos + local > USABLE_SIZE {
        return Err(CellSkip::TruncatedCell {
            offset: cell_offset,
        });
    }

    let mut payload = Vec::with_capacity(declared as usize);
    payload.extend_from_slice(&data[pos..pos + local]);

    if (local as u64) < declared {
        if pos + local + OVERFLOW_LINK_SIZE > USABLE_SIZE {
            return Err(CellSkip::TruncatedCell {
                offset: cell_offset,
            });
        }

        let first_overflow = read_u32_be(data, pos + local);
        follow_chain(file, first_overflow, declared, &mut payload)?;
    }

    debug_assert_eq!(payload.len() as u64, declared);
    Ok(payload)
}

/// Walks the overflow chain starting at `next`, appending to `payload`
/// until `declared` bytes are assembled.
fn follow_chain(
    file: &SourceFile,
    mut next: u32,
    declared: u64,
    payload: &mut Vec<u8>,
) -> Result<(), CellSkip> {
    let mut visited: HashSet<u32> = HashSet::new();

    while (payload.len() as u64) < declared {
        let broken = || CellSkip::BrokenChain {
            declared,
            reassembled: payload.len() as u64,
        };

        if next == 0 {
            return Err(broken());
        }

        // A valid chain visits each page of the file at most once; a
        // link back to a visited page marks the payload invalid. The
        // visited set also bounds the walk by the file's page count.
        if !visited.insert(next) || visited.len() > file.page_count() as usize {
            return Err(broken());
        }

        let overflow = match file.page(next) {
            Ok(data) => data,
            Err(_) => return Err(broken()),
        };

        next = read_u32_be(overflow, 0);

        let remaining = (declared - payload.len() as u64) as usize;
        let take = remaining.min(OVERFLOW_CAPACITY);
        payload.extend_from_slice(&overflow[OVERFLOW_LINK_SIZE..OVERFLOW_LINK_SIZE + take]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LEAF_HEADER_SIZE, PAGE_SIZE};
    use crate::encoding::encode_varint;
    use crate::format::{
        write_u16_be, write_u32_be, MAX_LOCAL, MIN_LOCAL, FLAG_INTERIOR_INDEX, FLAG_LEAF_INDEX,
    };
    use proptest::prelude::*;
    use std::io::Write;

    /// Lays `raw_cells` into a page from the top of the usable area
    /// downward and fills the header and pointer array around them.
    fn page_with_raw_cells(flag: u8, raw_cells: &[Vec<u8>], right_child: u32) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = flag;

        let header_size = if flag == FLAG_INTERIOR_INDEX { 12 } else { 8 };
        let mut region = USABLE_SIZE;

        for (i, cell) in raw_cells.iter().enumerate() {
            region -= cell.len();
            page[region..region + cell.len()].copy_from_slice(cell);
            write_u16_be(&mut page, header_size + i * 2, region as u16);
        }

        write_u16_be(&mut page, 3, raw_cells.len() as u16);
        write_u16_be(&mut page, 5, region as u16);
        if flag == FLAG_INTERIOR_INDEX {
            write_u32_be(&mut page, 8, right_child);
        }

        page
    }

    fn leaf_cell(payload: &[u8], first_overflow: Option<u32>) -> Vec<u8> {
        let mut buf = [0u8; 9];
        let n = encode_varint(payload.len() as u64, &mut buf);
        let local = local_size(payload.len() as u64, USABLE_SIZE);

        let mut cell = buf[..n].to_vec();
        cell.extend_from_slice(&payload[..local]);
        if let Some(pno) = first_overflow {
            cell.extend_from_slice(&pno.to_be_bytes());
        }
        cell
    }

    fn interior_cell(left_child: u32, payload: &[u8], first_overflow: Option<u32>) -> Vec<u8> {
        let mut cell = left_child.to_be_bytes().to_vec();
        cell.extend_from_slice(&leaf_cell(payload, first_overflow));
        cell
    }

    fn overflow_page(next: u32, chunk: &[u8]) -> Vec<u8> {
        assert!(chunk.len() <= OVERFLOW_CAPACITY);
        let mut page = vec![0u8; PAGE_SIZE];
        write_u32_be(&mut page, 0, next);
        page[OVERFLOW_LINK_SIZE..OVERFLOW_LINK_SIZE + chunk.len()].copy_from_slice(chunk);
        page
    }

    fn make_file(pages: &[Vec<u8>]) -> (tempfile::NamedTempFile, SourceFile) {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        for page in pages {
            file.write_all(page).expect("should write page");
        }
        file.flush().expect("should flush");
        let source = SourceFile::open(file.path()).expect("should open source");
        (file, source)
    }

    fn extract_cell(source: &SourceFile, pno: u32, cell: usize) -> Result<Vec<u8>, CellSkip> {
        let page = SourcePage::new(source.page(pno).unwrap(), pno).unwrap();
        let header = page.header().unwrap();
        let offsets = page.cell_offsets(&header).unwrap();
        extract_payload(source, &page, header.kind, offsets[cell])
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 13) as u8).collect()
    }

    #[test]
    fn local_leaf_payloads_roundtrip() {
        let cells = vec![leaf_cell(b"a", None), leaf_cell(b"bb", None)];
        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &cells, 0);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert_eq!(extract_cell(&source, 2, 0).unwrap(), b"a");
        assert_eq!(extract_cell(&source, 2, 1).unwrap(), b"bb");
    }

    #[test]
    fn payload_exactly_max_local_has_no_overflow() {
        let payload = pattern(MAX_LOCAL);
        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(&payload, None)], 0);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert_eq!(extract_cell(&source, 2, 0).unwrap(), payload);
    }

    #[test]
    fn payload_one_past_max_local_spills_to_min_local() {
        let payload = pattern(MAX_LOCAL + 1);
        let local = local_size(payload.len() as u64, USABLE_SIZE);
        assert_eq!(local, MIN_LOCAL);

        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(&payload, Some(3))], 0);
        let chain = overflow_page(0, &payload[local..]);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page, chain]);

        assert_eq!(extract_cell(&source, 2, 0).unwrap(), payload);
    }

    #[test]
    fn interior_cell_skips_left_child_and_follows_two_page_chain() {
        let payload = pattern(MIN_LOCAL + 2 * OVERFLOW_CAPACITY + 500);
        let local = local_size(payload.len() as u64, USABLE_SIZE);
        assert!(payload.len() - local > OVERFLOW_CAPACITY);

        let cell = interior_cell(99, &payload, Some(3));
        let page = page_with_raw_cells(FLAG_INTERIOR_INDEX, &[cell], 98);
        let first = overflow_page(4, &payload[local..local + OVERFLOW_CAPACITY]);
        let second = overflow_page(0, &payload[local + OVERFLOW_CAPACITY..]);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page, first, second]);

        assert_eq!(extract_cell(&source, 2, 0).unwrap(), payload);
    }

    #[test]
    fn zero_size_payload_is_skipped() {
        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(b"", None)], 0);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert_eq!(extract_cell(&source, 2, 0), Err(CellSkip::EmptyPayload));
    }

    #[test]
    fn offset_outside_usable_page_is_skipped() {
        let mut page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(b"ok", None)], 0);
        write_u16_be(&mut page, LEAF_HEADER_SIZE, 65535);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert_eq!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::OffsetOutOfRange { offset: 65535 })
        );
    }

    #[test]
    fn offset_inside_header_is_skipped() {
        let mut page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(b"ok", None)], 0);
        write_u16_be(&mut page, LEAF_HEADER_SIZE, 4);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert!(matches!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn declared_size_beyond_file_supply_is_skipped() {
        // Declares ~16MB in a 2-page file.
        let mut cell = Vec::new();
        let mut buf = [0u8; 9];
        let n = encode_varint(16_000_000, &mut buf);
        cell.extend_from_slice(&buf[..n]);
        cell.extend_from_slice(&pattern(MIN_LOCAL));
        cell.extend_from_slice(&3u32.to_be_bytes());

        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[cell], 0);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert!(matches!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::OversizedPayload { .. })
        ));
    }

    #[test]
    fn chain_terminating_early_is_skipped() {
        let payload = pattern(MIN_LOCAL + 2 * OVERFLOW_CAPACITY + 500);
        let local = local_size(payload.len() as u64, USABLE_SIZE);

        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(&payload, Some(3))], 0);
        // The single chain page claims the list ends here; a full page of
        // payload is missing.
        let first = overflow_page(0, &payload[local..local + OVERFLOW_CAPACITY]);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page, first]);

        assert!(matches!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::BrokenChain { .. })
        ));
    }

    #[test]
    fn chain_link_outside_file_is_skipped() {
        let payload = pattern(MAX_LOCAL + 100);
        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(&payload, Some(40))], 0);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page]);

        assert!(matches!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::BrokenChain { .. })
        ));
    }

    #[test]
    fn cyclic_chain_hits_iteration_bound() {
        let payload = pattern(MIN_LOCAL + 3 * OVERFLOW_CAPACITY);
        let local = local_size(payload.len() as u64, USABLE_SIZE);

        let page = page_with_raw_cells(FLAG_LEAF_INDEX, &[leaf_cell(&payload, Some(3))], 0);
        // Page 3 links to itself; the walk must stop at the page-count
        // bound instead of spinning.
        let cycle = overflow_page(3, &payload[local..local + OVERFLOW_CAPACITY]);
        let (_tmp, source) = make_file(&[vec![0u8; PAGE_SIZE], page, cycle]);

        assert!(matches!(
            extract_cell(&source, 2, 0),
            Err(CellSkip::BrokenChain { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn reassembly_matches_synthesized_payload(
            len in 1usize..3 * OVERFLOW_CAPACITY,
            seed: u8,
        ) {
            let payload: Vec<u8> =
                (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
            let local = local_size(len as u64, USABLE_SIZE);

            let mut pages = vec![vec![0u8; PAGE_SIZE]];
            let spilled = local < len;
            let first_overflow = if spilled { Some(3u32) } else { None };
            pages.push(page_with_raw_cells(
                FLAG_LEAF_INDEX,
                &[leaf_cell(&payload, first_overflow)],
                0,
            ));

            let mut rest = &payload[local..];
            let mut next_pno = 4u32;
            while !rest.is_empty() {
                let take = rest.len().min(OVERFLOW_CAPACITY);
                let link = if take == rest.len() { 0 } else { next_pno };
                pages.push(overflow_page(link, &rest[..take]));
                rest = &rest[take..];
                next_pno += 1;
            }

            let (_tmp, source) = make_file(&pages);
            prop_assert_eq!(extract_cell(&source, 2, 0).unwrap(), payload);
        }
    }
}
