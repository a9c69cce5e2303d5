//! End-to-end salvage scenarios: synthesize a damaged source file as raw
//! bytes, run the restore driver against a freshly created template, and
//! verify the template's contents through the engine.

use std::fs;
use std::path::{Path, PathBuf};

use sos::codec::PageChecksumCodec;
use sos::config::{INDEX_ROOT_PAGE, OVERFLOW_CAPACITY, OVERFLOW_LINK_SIZE, PAGE_SIZE, USABLE_SIZE};
use sos::encoding::encode_varint;
use sos::engine::{create_template, Engine};
use sos::format::{local_size, write_u16_be, write_u32_be, MIN_LOCAL};
use sos::{restore, Metrics, RestoreConfig};

const FLAG_LEAF: u8 = 0x0a;
const FLAG_INTERIOR: u8 = 0x02;

// ----------------------------------------------------------------------
// Raw source-file builders
// ----------------------------------------------------------------------

/// Lays raw cells into a page from the top of the usable area downward.
fn page_with_raw_cells(flag: u8, raw_cells: &[Vec<u8>], right_child: u32) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = flag;

    let header_size = if flag == FLAG_INTERIOR { 12 } else { 8 };
    let mut region = USABLE_SIZE;

    for (i, cell) in raw_cells.iter().enumerate() {
        region -= cell.len();
        page[region..region + cell.len()].copy_from_slice(cell);
        write_u16_be(&mut page, header_size + i * 2, region as u16);
    }

    write_u16_be(&mut page, 3, raw_cells.len() as u16);
    write_u16_be(&mut page, 5, region as u16);
    if flag == FLAG_INTERIOR {
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

fn leaf_page(payloads: &[&[u8]]) -> Vec<u8> {
    let cells: Vec<Vec<u8>> = payloads.iter().map(|p| leaf_cell(p, None)).collect();
    page_with_raw_cells(FLAG_LEAF, &cells, 0)
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

struct Scenario {
    _dir: tempfile::TempDir,
    source: PathBuf,
    template: PathBuf,
}

impl Scenario {
    /// Writes the source pages (page 1 is always a header placeholder
    /// the driver never reads) and creates a fresh template.
    fn new(source_pages: &[Vec<u8>]) -> Self {
        let dir = tempfile::tempdir().expect("should create temp dir");

        let source = dir.path().join("damaged.db");
        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[0] = 0x53;
        for page in source_pages {
            assert_eq!(page.len(), PAGE_SIZE);
            bytes.extend_from_slice(page);
        }
        fs::write(&source, bytes).expect("should write source file");

        let template = dir.path().join("template.db");
        create_template(&template).expect("should create template");

        Self {
            _dir: dir,
            source,
            template,
        }
    }

    fn run(&self, start_page: u32) -> eyre::Result<Metrics> {
        let config = RestoreConfig::new(&self.template, start_page)?;
        restore(&self.source, &config)
    }

    fn run_batched(&self, pages_per_txn: u32, txns_per_checkpoint: u32) -> Metrics {
        let mut config = RestoreConfig::new(&self.template, 2).expect("should build config");
        config.pages_per_txn = pages_per_txn;
        config.txns_per_checkpoint = txns_per_checkpoint;
        restore(&self.source, &config).expect("restore should succeed")
    }

    fn template_keys(&self) -> Vec<Vec<u8>> {
        scan_template(&self.template)
    }
}

fn scan_template(path: &Path) -> Vec<Vec<u8>> {
    let mut engine = Engine::open(path).expect("should open template");
    engine
        .install_codec(PageChecksumCodec::new("verify"))
        .expect("should install codec");
    let keys = engine
        .scan_index(INDEX_ROOT_PAGE)
        .expect("should scan the index");
    engine.close().expect("should close");
    keys
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 11 + 5) as u8).collect()
}

// ----------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------

#[test]
fn scenario_leaf_with_two_local_keys() {
    let scenario = Scenario::new(&[leaf_page(&[b"a", b"bb"])]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(
        metrics,
        Metrics {
            pages: 1,
            skip_pages: 0,
            cells: 2,
            bytes: 3,
        }
    );
    assert_eq!(scenario.template_keys(), vec![b"a".to_vec(), b"bb".to_vec()]);
}

#[test]
fn scenario_table_leaf_flag_is_skipped() {
    let mut page = leaf_page(&[b"a", b"bb"]);
    page[0] = 0x05;
    let scenario = Scenario::new(&[page]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 0);
    assert_eq!(metrics.skip_pages, 1);
    assert_eq!(metrics.cells, 0);
    assert!(scenario.template_keys().is_empty());
}

#[test]
fn scenario_interior_key_spilled_over_two_overflow_pages() {
    let payload = pattern(MIN_LOCAL + 2 * OVERFLOW_CAPACITY + 500);
    let local = local_size(payload.len() as u64, USABLE_SIZE);
    assert!(payload.len() - local > OVERFLOW_CAPACITY, "needs a 2-page chain");

    // p2 = interior with one spilled cell; p3, p4 = its overflow chain.
    let scenario = Scenario::new(&[
        page_with_raw_cells(FLAG_INTERIOR, &[interior_cell(77, &payload, Some(3))], 78),
        overflow_page(4, &payload[local..local + OVERFLOW_CAPACITY]),
        overflow_page(0, &payload[local + OVERFLOW_CAPACITY..]),
    ]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 1);
    assert_eq!(metrics.skip_pages, 2);
    assert_eq!(metrics.cells, 1);
    assert_eq!(metrics.bytes, payload.len() as u64);
    assert_eq!(scenario.template_keys(), vec![payload]);
}

#[test]
fn scenario_bulk_pages_with_batched_commits_and_checkpoints() {
    let mut pages = Vec::new();
    let mut expected = Vec::new();

    for page_no in 0..60u32 {
        let keys: Vec<Vec<u8>> = (0..20u32)
            .map(|cell| {
                let mut key = vec![0u8; 16];
                key[..4].copy_from_slice(&page_no.to_be_bytes());
                key[4..8].copy_from_slice(&cell.to_be_bytes());
                key[8..].copy_from_slice(b"salvaged");
                key
            })
            .collect();
        expected.extend(keys.iter().cloned());
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        pages.push(leaf_page(&refs));
    }

    let scenario = Scenario::new(&pages);

    // 60 decoded pages at 16 per transaction = 4 commits, with a full
    // checkpoint every 2 commits.
    let metrics = scenario.run_batched(16, 2);

    assert_eq!(metrics.pages, 60);
    assert_eq!(metrics.skip_pages, 0);
    assert_eq!(metrics.cells, 1200);
    assert_eq!(metrics.bytes, 1200 * 16);

    let keys = scan_template(&scenario.template);
    assert_eq!(keys.len(), 1200);

    expected.sort();
    assert_eq!(keys, expected);
}

#[test]
fn scenario_out_of_range_cell_offset_skips_only_that_cell() {
    let mut page = leaf_page(&[b"good-one", b"good-two", b"doomed"]);
    // Point the last cell at offset 65535, far outside the page.
    write_u16_be(&mut page, 8 + 2 * 2, 65535);
    let scenario = Scenario::new(&[page]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 1);
    assert_eq!(metrics.cells, 3);
    assert_eq!(metrics.bytes, 16);
    assert_eq!(
        scenario.template_keys(),
        vec![b"good-one".to_vec(), b"good-two".to_vec()]
    );
}

#[test]
fn duplicate_keys_across_pages_collapse_to_one_entry() {
    let scenario = Scenario::new(&[
        leaf_page(&[b"shared", b"unique-1"]),
        leaf_page(&[b"shared", b"unique-2"]),
    ]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 2);
    assert_eq!(metrics.cells, 4);
    assert_eq!(
        scenario.template_keys(),
        vec![b"shared".to_vec(), b"unique-1".to_vec(), b"unique-2".to_vec()]
    );
}

#[test]
fn broken_overflow_chain_skips_the_cell_but_keeps_the_rest() {
    let spilled = pattern(MIN_LOCAL + 2 * OVERFLOW_CAPACITY);
    let local = local_size(spilled.len() as u64, USABLE_SIZE);

    // The chain claims to continue on page 9, which does not exist.
    let cells = vec![leaf_cell(b"survivor", None), leaf_cell(&spilled, Some(3))];
    let scenario = Scenario::new(&[
        page_with_raw_cells(FLAG_LEAF, &cells, 0),
        overflow_page(9, &spilled[local..local + OVERFLOW_CAPACITY]),
    ]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 1);
    assert_eq!(metrics.bytes, b"survivor".len() as u64);
    assert_eq!(scenario.template_keys(), vec![b"survivor".to_vec()]);
}

#[test]
fn zero_cell_page_counts_but_inserts_nothing() {
    let scenario = Scenario::new(&[leaf_page(&[])]);

    let metrics = scenario.run(2).expect("restore should succeed");

    assert_eq!(metrics.pages, 1);
    assert_eq!(metrics.cells, 0);
    assert!(scenario.template_keys().is_empty());
}

#[test]
fn start_page_beyond_file_is_a_clean_noop() {
    let scenario = Scenario::new(&[leaf_page(&[b"unreached"])]);

    let metrics = scenario.run(50).expect("restore should succeed");

    assert_eq!(metrics, Metrics::default());
    assert!(scenario.template_keys().is_empty());
}

#[test]
fn start_page_below_two_is_rejected() {
    let scenario = Scenario::new(&[leaf_page(&[b"x"])]);
    assert!(scenario.run(1).is_err());
}

#[test]
fn restored_template_is_itself_salvageable() {
    // The engine writes the same page format the decoder reads: running
    // the salvager over its own output must recover the same key set.
    let keys: Vec<Vec<u8>> = (0..300u32)
        .map(|i| format!("round-trip-{:06}", i).into_bytes())
        .collect();
    let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();

    let first = Scenario::new(&[leaf_page(&refs)]);
    first.run_batched(8, 2);
    let first_keys = first.template_keys();
    assert_eq!(first_keys.len(), 300);

    // Use the rebuilt template as the next source.
    let second = Scenario::new(&[]);
    let config = RestoreConfig::new(&second.template, 2).expect("should build config");
    let metrics = restore(&first.template, &config).expect("second pass should succeed");

    assert!(metrics.pages >= 1);
    assert_eq!(second.template_keys(), first_keys);
}
