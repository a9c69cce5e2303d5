//! # Embedded Engine
//!
//! The storage engine behind the restore driver, exposing exactly the
//! surface the driver consumes: open, codec installation, reserve-size
//! confirmation, the four PRAGMA statements, write transactions, a
//! B-tree cursor with key insertion, commit, WAL checkpoints, and close.
//!
//! ## Layers
//!
//! - [`pager`] — mmap over the template file, codec hooks on every page
//!   I/O, transaction page caches, checkpoint application
//! - [`wal`] — the sidecar log with commit markers and checksummed frames
//! - [`btree`] — the insert-only index B-tree and its key comparator
//! - [`template`] — creation and header parsing of template databases
//!
//! ## Codec attachment
//!
//! [`Engine::install_codec`] verifies page 1 the way a cold open must:
//! first as a `DEFAULT_PAGE_SIZE` page (all that can be assumed before
//! the header is parsed), then — after announcing the real geometry via
//! `size_change` — at full size. The pager owns the codec from then on
//! and releases it when the engine closes (`Drop` stands in for the
//! C-style `free` hook).
//!
//! ## Cursors
//!
//! `BtCursor` is plain state (root page, writability, key description);
//! operations live on the engine, mirroring a C-style cursor API. The
//! driver zeroes a cursor per transaction, opens it on the template's
//! root, inserts keys through it, and closes it before committing.

pub mod btree;
pub mod pager;
pub mod template;
pub mod wal;

use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};

pub use btree::{BTree, Collation, KeyInfo};
pub use pager::{CheckpointMode, CheckpointOutcome, DbFile, Pager};
pub use template::{create_template, parse_header, TemplateHeader};
pub use wal::{SyncMode, Wal};

use crate::codec::{CodecOp, PageChecksumCodec};
use crate::config::{DEFAULT_PAGE_SIZE, RESERVED_BYTES};

/// Cursor state for one index. Zero it per transaction, open it through
/// [`Engine::open_cursor`], and close it before committing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BtCursor {
    root_page: u32,
    writable: bool,
    key_info: KeyInfo,
    valid: bool,
}

impl BtCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the cursor to its zeroed state.
    pub fn zero(&mut self) {
        *self = Self::default();
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug)]
pub struct Engine {
    pager: Pager,
    header: TemplateHeader,
    path: PathBuf,
    wal_autocheckpoint: u32,
}

impl Engine {
    /// Opens a template database read-write. The codec is not attached
    /// yet; install it before touching any page.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let db = DbFile::open(path)?;
        let wal = Wal::open(&Wal::sidecar_path(path))
            .wrap_err_with(|| format!("failed to open WAL for '{}'", path.display()))?;

        let mut pager = Pager::open(db, wal);
        let header = parse_header(&pager.read_page_raw(1)?)
            .wrap_err_with(|| format!("'{}' is not a usable template", path.display()))?;

        Ok(Self {
            pager,
            header,
            path: path.to_path_buf(),
            wal_autocheckpoint: 0,
        })
    }

    /// Attaches the checksum codec to the pager, verifying page 1 both as
    /// a default-size page (the cold-open view) and at full size.
    pub fn install_codec(&mut self, mut codec: PageChecksumCodec) -> Result<()> {
        let mut page1 = self.pager.read_page_raw(1)?;

        codec.size_change(DEFAULT_PAGE_SIZE, RESERVED_BYTES);
        ensure!(
            codec.apply(&mut page1, 1, CodecOp::ReadPage).is_some(),
            "page 1 of '{}' failed checksum verification at the default page size",
            self.path.display()
        );

        codec.size_change(
            self.header.page_size as usize,
            self.header.reserve_size as usize,
        );
        ensure!(
            codec.apply(&mut page1, 1, CodecOp::ReadPage).is_some(),
            "page 1 of '{}' failed checksum verification at the full page size",
            self.path.display()
        );

        self.pager.set_codec(codec);
        Ok(())
    }

    /// Confirms the per-page reserved byte count. Must match the
    /// template's geometry.
    pub fn set_reserve_size(&mut self, reserve: usize) -> Result<()> {
        ensure!(
            reserve == self.header.reserve_size as usize,
            "reserve size {} does not match the template's {}",
            reserve,
            self.header.reserve_size
        );
        Ok(())
    }

    /// Executes one PRAGMA statement. Returns the result row, if the
    /// pragma produces one.
    pub fn pragma(&mut self, statement: &str) -> Result<Option<String>> {
        let trimmed = statement.trim();
        let trimmed = trimmed
            .strip_prefix("PRAGMA ")
            .or_else(|| trimmed.strip_prefix("pragma "))
            .unwrap_or(trimmed);

        let (name, value) = match trimmed.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (trimmed, None),
        };
        let name = name.to_uppercase();
        let value = value.map(|v| v.to_uppercase());

        match name.as_str() {
            "JOURNAL_MODE" => {
                if let Some(val) = value.as_deref() {
                    ensure!(val == "WAL", "unsupported journal mode: {}", val);
                }
                Ok(Some("wal".to_string()))
            }
            "SYNCHRONOUS" => {
                if let Some(val) = value.as_deref() {
                    let mode = match val {
                        "OFF" | "0" => SyncMode::Off,
                        "NORMAL" | "1" => SyncMode::Normal,
                        "FULL" | "2" => SyncMode::Full,
                        _ => bail!(
                            "invalid PRAGMA synchronous value: {} (use OFF, NORMAL, or FULL)",
                            val
                        ),
                    };
                    self.pager.wal_mut().set_sync_mode(mode);
                }
                Ok(None)
            }
            "AUTO_VACUUM" => {
                if let Some(val) = value.as_deref() {
                    ensure!(
                        val == "NONE" || val == "0",
                        "unsupported auto_vacuum mode: {}",
                        val
                    );
                }
                Ok(None)
            }
            "WAL_AUTOCHECKPOINT" => {
                if let Some(val) = value.as_deref() {
                    let frames: u32 = val
                        .parse()
                        .wrap_err_with(|| format!("invalid wal_autocheckpoint value: {}", val))?;
                    self.wal_autocheckpoint = frames;
                }
                Ok(Some(self.wal_autocheckpoint.to_string()))
            }
            _ => bail!("unknown PRAGMA: {}", name),
        }
    }

    pub fn root_page(&self) -> u32 {
        self.header.root_page
    }

    pub fn begin_write_tx(&mut self) -> Result<()> {
        self.pager.begin_write()
    }

    /// Opens a zeroed cursor on an index root.
    pub fn open_cursor(
        &mut self,
        cursor: &mut BtCursor,
        root_page: u32,
        writable: bool,
        key_info: KeyInfo,
    ) -> Result<()> {
        if writable {
            ensure!(
                self.pager.in_transaction(),
                "writable cursor requires an open write transaction"
            );
        }
        ensure!(
            root_page >= 1 && root_page <= self.pager.page_count(),
            "cursor root page {} out of bounds",
            root_page
        );

        cursor.root_page = root_page;
        cursor.writable = writable;
        cursor.key_info = key_info;
        cursor.valid = true;
        Ok(())
    }

    /// Inserts an opaque key (no value — the target is an index) through
    /// a writable cursor.
    pub fn insert_key(&mut self, cursor: &BtCursor, key: &[u8]) -> Result<()> {
        ensure!(cursor.valid, "insert through a closed cursor");
        ensure!(cursor.writable, "insert through a read-only cursor");

        BTree::new(&mut self.pager, cursor.root_page, cursor.key_info)?.insert(key)
    }

    pub fn close_cursor(&mut self, cursor: &mut BtCursor) -> Result<()> {
        cursor.valid = false;
        Ok(())
    }

    /// Commits the open transaction and, if `wal_autocheckpoint` is
    /// armed and the log has grown past it, checkpoints inline.
    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit()?;

        if self.wal_autocheckpoint > 0
            && self.pager.wal().committed_frame_count() >= self.wal_autocheckpoint as u64
        {
            self.pager.checkpoint(CheckpointMode::Full)?;
        }

        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.pager.rollback()
    }

    pub fn wal_checkpoint(&mut self, mode: CheckpointMode) -> Result<CheckpointOutcome> {
        self.pager.checkpoint(mode)
    }

    /// Collects every key in the index, in order. Verification surface
    /// for tests and post-restore inspection.
    pub fn scan_index(&mut self, root_page: u32) -> Result<Vec<Vec<u8>>> {
        BTree::new(&mut self.pager, root_page, KeyInfo::default())?.scan()
    }

    /// Closes the database: any open transaction is rolled back, the main
    /// file is synced, and the pager (with its codec) is dropped.
    pub fn close(mut self) -> Result<()> {
        if self.pager.in_transaction() {
            self.pager.rollback()?;
        }
        self.pager.sync()
    }
}
