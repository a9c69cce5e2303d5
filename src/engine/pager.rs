//! # Pager
//!
//! The pager owns the template database's three storage layers — the
//! memory-mapped main file, the WAL, and the open transaction's page
//! cache — and runs the checksum codec on every page that crosses an I/O
//! boundary:
//!
//! - every page **read** (from the main file or the WAL) is verified
//!   through the codec before the B-tree sees it; a mismatch is a fatal
//!   corrupt-page error,
//! - every dirty page is **stamped** through the codec at commit time,
//!   before its image enters the WAL.
//!
//! Reads resolve in order: the transaction's dirty set, the clean cache,
//! the WAL's latest committed image, the main file. Checkpoints copy WAL
//! images into the main file verbatim — the images already carry their
//! trailers, so the codec does not run again.
//!
//! ## Transactions
//!
//! A single write transaction may be open at a time. Page allocation
//! bumps the transaction's logical page count; the file itself only grows
//! at checkpoint, so an aborted transaction leaves no trace. Commit
//! stamps the dirty set, appends it to the WAL as one marked batch, and
//! promotes the images to the clean cache.
//!
//! ## Cold open
//!
//! Page 1 is verified twice when the codec is installed: first as a
//! `DEFAULT_PAGE_SIZE` page (all the engine can assume before parsing the
//! header), then — after `size_change` announces the real geometry — at
//! full size.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use memmap2::MmapMut;

use crate::codec::{CodecOp, PageChecksumCodec};
use crate::config::PAGE_SIZE;

use super::wal::Wal;

/// Memory-mapped view of the main database file. Pages are 1-based.
#[derive(Debug)]
pub struct DbFile {
    file: File,
    mmap: MmapMut,
    page_count: u32,
}

impl DbFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            "cannot open empty database file '{}'",
            path.display()
        );
        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        // SAFETY: the file is opened read-write by this process only (the
        // tool is the sole writer by contract), the mmap lifetime is tied
        // to DbFile, and all access goes through page()/page_mut() which
        // bounds-check the page number.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count: (file_size / PAGE_SIZE as u64) as u32,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, initial_page_count: u32) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            initial_page_count > 0,
            "initial page count must be at least 1"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        let file_size = initial_page_count as u64 * PAGE_SIZE as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: freshly created file with exclusive access, size set to
        // a PAGE_SIZE multiple above; lifetime and bounds as in open().
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count: initial_page_count,
        })
    }

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

    pub fn page_mut(&mut self, pno: u32) -> Result<&mut [u8]> {
        ensure!(
            pno >= 1 && pno <= self.page_count,
            "page {} out of bounds (file has {} pages)",
            pno,
            self.page_count
        );
        let offset = (pno as usize - 1) * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_page_count as u64 * PAGE_SIZE as u64;
        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: grow() takes &mut self, so no page borrows exist; the
        // file was extended before remapping and the old map was flushed.
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };
        self.page_count = new_page_count;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Full,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Done { frames: u64 },
    Busy,
}

#[derive(Debug)]
struct TxState {
    dirty: HashMap<u32, Vec<u8>>,
    /// Logical page count including pages allocated by this transaction.
    page_count: u32,
}

#[derive(Debug)]
pub struct Pager {
    db: DbFile,
    wal: Wal,
    codec: Option<PageChecksumCodec>,
    /// Logical page count of the committed state (file or WAL, whichever
    /// is newer).
    committed_page_count: u32,
    /// Verified images of committed pages.
    clean: HashMap<u32, Vec<u8>>,
    tx: Option<TxState>,
}

impl Pager {
    pub fn open(db: DbFile, wal: Wal) -> Self {
        let committed_page_count = db.page_count().max(wal.committed_db_size());
        Self {
            db,
            wal,
            codec: None,
            committed_page_count,
            clean: HashMap::new(),
            tx: None,
        }
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut Wal {
        &mut self.wal
    }

    pub fn codec(&self) -> Option<&PageChecksumCodec> {
        self.codec.as_ref()
    }

    pub fn codec_mut(&mut self) -> Option<&mut PageChecksumCodec> {
        self.codec.as_mut()
    }

    /// Attaches the codec. The pager owns it until close.
    pub fn set_codec(&mut self, codec: PageChecksumCodec) {
        self.codec = Some(codec);
    }

    pub fn page_count(&self) -> u32 {
        match &self.tx {
            Some(tx) => tx.page_count,
            None => self.committed_page_count,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Reads a page image from WAL or main file without codec
    /// verification. Used during the cold open, before the codec knows
    /// the page geometry.
    pub fn read_page_raw(&mut self, pno: u32) -> Result<Vec<u8>> {
        if let Some(image) = self.wal.read_page(pno)? {
            return Ok(image);
        }
        Ok(self.db.page(pno)?.to_vec())
    }

    fn load_page(&mut self, pno: u32) -> Result<Vec<u8>> {
        let mut image = self.read_page_raw(pno)?;

        if let Some(codec) = &self.codec {
            if codec.apply(&mut image, pno, CodecOp::ReadPage).is_none() {
                bail!("page {} failed checksum verification", pno);
            }
        }

        Ok(image)
    }

    fn ensure_cached(&mut self, pno: u32) -> Result<()> {
        let in_dirty = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.dirty.contains_key(&pno));
        if in_dirty || self.clean.contains_key(&pno) {
            return Ok(());
        }

        ensure!(
            pno >= 1 && pno <= self.committed_page_count,
            "page {} out of bounds (database has {} pages)",
            pno,
            self.committed_page_count
        );

        let image = self.load_page(pno)?;
        self.clean.insert(pno, image);
        Ok(())
    }

    /// Borrows the current image of a page (dirty set first, then the
    /// committed state).
    pub fn page(&mut self, pno: u32) -> Result<&[u8]> {
        self.ensure_cached(pno)?;

        if let Some(tx) = self.tx.as_ref() {
            if let Some(image) = tx.dirty.get(&pno) {
                return Ok(image);
            }
        }

        self.clean
            .get(&pno)
            .map(|image| image.as_slice())
            .ok_or_else(|| eyre::eyre!("page {} missing from pager cache", pno))
    }

    /// Borrows a page for modification, moving it into the transaction's
    /// dirty set.
    pub fn page_mut(&mut self, pno: u32) -> Result<&mut [u8]> {
        let page_count = match &self.tx {
            Some(tx) => tx.page_count,
            None => bail!("page {} written outside a write transaction", pno),
        };
        ensure!(
            pno >= 1 && pno <= page_count,
            "page {} out of bounds (transaction sees {} pages)",
            pno,
            page_count
        );

        let in_dirty = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.dirty.contains_key(&pno));
        if !in_dirty {
            let image = match self.clean.remove(&pno) {
                Some(image) => image,
                None => self.load_page(pno)?,
            };
            if let Some(tx) = self.tx.as_mut() {
                tx.dirty.insert(pno, image);
            }
        }

        let tx = self.tx.as_mut().expect("transaction checked above");
        tx.dirty
            .get_mut(&pno)
            .map(|image| image.as_mut_slice())
            .ok_or_else(|| eyre::eyre!("page {} missing from dirty set", pno))
    }

    /// Allocates a fresh zeroed page at the end of the database.
    pub fn allocate_page(&mut self) -> Result<u32> {
        let tx = match self.tx.as_mut() {
            Some(tx) => tx,
            None => bail!("page allocation outside a write transaction"),
        };

        tx.page_count += 1;
        let pno = tx.page_count;
        tx.dirty.insert(pno, vec![0u8; PAGE_SIZE]);
        Ok(pno)
    }

    pub fn begin_write(&mut self) -> Result<()> {
        ensure!(self.tx.is_none(), "a write transaction is already open");
        self.tx = Some(TxState {
            dirty: HashMap::new(),
            page_count: self.committed_page_count,
        });
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        ensure!(self.tx.is_some(), "no write transaction to roll back");
        self.tx = None;
        Ok(())
    }

    /// Stamps every dirty page through the codec and appends the batch to
    /// the WAL under a single commit marker.
    pub fn commit(&mut self) -> Result<()> {
        let mut tx = match self.tx.take() {
            Some(tx) => tx,
            None => bail!("no write transaction to commit"),
        };

        if tx.dirty.is_empty() {
            return Ok(());
        }

        let mut pnos: Vec<u32> = tx.dirty.keys().copied().collect();
        pnos.sort_unstable();

        for &pno in &pnos {
            let image = tx
                .dirty
                .get_mut(&pno)
                .expect("dirty key collected above");
            let passed = match &self.codec {
                Some(codec) => codec.apply(image, pno, CodecOp::WriteDbPage).is_some(),
                None => true,
            };
            ensure!(passed, "checksum codec refused to stamp page {}", pno);
        }

        let frames: Vec<(u32, &[u8])> = pnos
            .iter()
            .map(|&pno| (pno, tx.dirty[&pno].as_slice()))
            .collect();
        self.wal.append_commit(&frames, tx.page_count)?;

        self.committed_page_count = tx.page_count;
        for (pno, image) in tx.dirty {
            self.clean.insert(pno, image);
        }

        Ok(())
    }

    /// Copies committed WAL images into the main file (`Full`) and, for
    /// `Restart`, truncates the log afterwards. `Busy` while a write
    /// transaction is open.
    pub fn checkpoint(&mut self, mode: CheckpointMode) -> Result<CheckpointOutcome> {
        if self.tx.is_some() {
            return Ok(CheckpointOutcome::Busy);
        }

        let frames = self.wal.unapplied_frame_count();

        if self.wal.committed_frame_count() > 0 {
            let db_size = self.wal.committed_db_size();
            if db_size > self.db.page_count() {
                self.db.grow(db_size)?;
            }

            for (page_no, offset) in self.wal.checkpoint_set() {
                let (frame_page, image) = self.wal.page_at(offset)?;
                ensure!(
                    frame_page == page_no,
                    "checkpoint frame mismatch: expected page {}, found {}",
                    page_no,
                    frame_page
                );
                self.db.page_mut(page_no)?.copy_from_slice(&image);
            }

            self.db.sync()?;
            self.wal.mark_applied();
        }

        if mode == CheckpointMode::Restart {
            self.wal.reset()?;
        }

        Ok(CheckpointOutcome::Done { frames })
    }

    pub fn sync(&self) -> Result<()> {
        self.db.sync()
    }
}
