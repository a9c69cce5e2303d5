//! # Restore Driver
//!
//! The main loop: walk the source file page by page from `start_page`,
//! decode every index page, and insert each reassembled key into the
//! template database through the engine's cursor, committing in bounded
//! batches and periodically checkpointing the WAL.
//!
//! ## Batching
//!
//! A write transaction opens lazily on the first decodable page and
//! commits once `pages_per_transaction` source pages have contributed;
//! every `transactions_per_checkpoint` commits trigger a full checkpoint
//! (`FULL` then `RESTART`). One final commit, one final full checkpoint,
//! and a close finish the run.
//!
//! ## Error policy
//!
//! Cell-level corruption is logged and skipped; a recognized page whose
//! header cannot be decoded is logged and counted as skipped; anything
//! the engine complains about is fatal. A `BUSY` checkpoint retries on a
//! 10 ms cadence, but bounded — a checkpoint that stays busy past the
//! ceiling is an error, not an infinite loop.
//!
//! ## Diagnostics
//!
//! Stdout carries a per-page header dump, per-commit and per-checkpoint
//! confirmations, and the caller prints the final metrics line
//! (`pages: N, skip pages: M, cells: C, bytes: B`).

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use eyre::{bail, ensure, Result};

use crate::codec::PageChecksumCodec;
use crate::config::{
    CHECKPOINT_RETRY_DELAY_MS, CHECKPOINT_RETRY_LIMIT, DEFAULT_PAGES_PER_TXN,
    DEFAULT_TXNS_PER_CHECKPOINT, RESERVED_BYTES,
};
use crate::engine::{BtCursor, CheckpointMode, CheckpointOutcome, Engine, KeyInfo};
use crate::source::{extract_payload, SourceFile, SourcePage};

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub template: PathBuf,
    /// First source page to scan; page 1 is the engine's own header and
    /// is never salvaged.
    pub start_page: u32,
    pub pages_per_txn: u32,
    pub txns_per_checkpoint: u32,
}

impl RestoreConfig {
    pub fn new(template: impl Into<PathBuf>, start_page: u32) -> Result<Self> {
        ensure!(
            start_page >= 2,
            "start page must be at least 2 (page 1 is the engine header)"
        );
        Ok(Self {
            template: template.into(),
            start_page,
            pages_per_txn: DEFAULT_PAGES_PER_TXN,
            txns_per_checkpoint: DEFAULT_TXNS_PER_CHECKPOINT,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Index pages decoded.
    pub pages: u32,
    /// Pages skipped: unrecognized flags and undecodable headers.
    pub skip_pages: u32,
    /// Cells declared by decoded page headers (including skipped cells).
    pub cells: u64,
    /// Bytes of key payload actually inserted.
    pub bytes: u64,
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pages: {}, skip pages: {}, cells: {}, bytes: {}",
            self.pages, self.skip_pages, self.cells, self.bytes
        )
    }
}

/// Runs the whole salvage: scan `source_path`, rebuild into the template
/// named by `config`.
pub fn restore(source_path: &Path, config: &RestoreConfig) -> Result<Metrics> {
    let source = SourceFile::open(source_path)?;

    let mut engine = Engine::open(&config.template)?;
    engine.install_codec(PageChecksumCodec::new(config.template.display().to_string()))?;
    engine.set_reserve_size(RESERVED_BYTES)?;

    let journal_mode = engine.pragma("journal_mode = WAL")?;
    ensure!(
        journal_mode.as_deref() == Some("wal"),
        "could not switch the template to WAL mode"
    );
    engine.pragma("synchronous = NORMAL")?;
    engine.pragma("auto_vacuum = NONE")?;
    engine.pragma("wal_autocheckpoint = 1")?;

    let root = engine.root_page();
    let mut metrics = Metrics::default();
    let mut cursor = BtCursor::new();
    let mut tx_open = false;
    let mut pages_in_txn = 0u32;
    let mut txns_since_checkpoint = 0u32;

    source.prefetch(config.start_page, source.page_count());

    for pno in config.start_page..=source.page_count() {
        let page = SourcePage::new(source.page(pno)?, pno)?;
        let kind = page.kind();

        if !kind.is_index() {
            metrics.skip_pages += 1;
            continue;
        }

        let header = match page.header() {
            Ok(header) => header,
            Err(err) => {
                println!("page: {}, undecodable header: {:#}", pno, err);
                metrics.skip_pages += 1;
                continue;
            }
        };
        let offsets = match page.cell_offsets(&header) {
            Ok(offsets) => offsets,
            Err(err) => {
                println!("page: {}, undecodable cell pointers: {:#}", pno, err);
                metrics.skip_pages += 1;
                continue;
            }
        };

        if !tx_open {
            engine.begin_write_tx()?;
            cursor.zero();
            engine.open_cursor(&mut cursor, root, true, KeyInfo::default())?;
            tx_open = true;
        }

        println!("page: {}, {}", pno, header);

        metrics.pages += 1;
        metrics.cells += header.cell_count as u64;

        for (i, &offset) in offsets.iter().enumerate() {
            match extract_payload(&source, &page, kind, offset) {
                Ok(payload) => {
                    metrics.bytes += payload.len() as u64;
                    engine.insert_key(&cursor, &payload)?;
                }
                Err(skip) => {
                    println!("skip cell {} of page {}: {}", i, pno, skip);
                }
            }
        }

        pages_in_txn += 1;
        if pages_in_txn >= config.pages_per_txn {
            engine.close_cursor(&mut cursor)?;
            engine.commit()?;
            println!("Committed");
            tx_open = false;
            pages_in_txn = 0;

            txns_since_checkpoint += 1;
            if txns_since_checkpoint >= config.txns_per_checkpoint {
                full_checkpoint(&mut engine)?;
                txns_since_checkpoint = 0;
            }
        }
    }

    if tx_open {
        engine.close_cursor(&mut cursor)?;
        engine.commit()?;
        println!("Committed");
    }

    full_checkpoint(&mut engine)?;
    engine.close()?;

    Ok(metrics)
}

/// Checkpoints the WAL fully: a `FULL` pass followed by a `RESTART`.
pub fn full_checkpoint(engine: &mut Engine) -> Result<()> {
    checkpoint_with_retry(engine, CheckpointMode::Full)?;
    checkpoint_with_retry(engine, CheckpointMode::Restart)?;
    println!("Checkpointed");
    Ok(())
}

fn checkpoint_with_retry(engine: &mut Engine, mode: CheckpointMode) -> Result<()> {
    for _ in 0..CHECKPOINT_RETRY_LIMIT {
        match engine.wal_checkpoint(mode)? {
            CheckpointOutcome::Done { .. } => return Ok(()),
            CheckpointOutcome::Busy => {
                thread::sleep(Duration::from_millis(CHECKPOINT_RETRY_DELAY_MS));
            }
        }
    }

    bail!(
        "checkpoint ({:?}) still busy after {} attempts",
        mode,
        CHECKPOINT_RETRY_LIMIT
    )
}
