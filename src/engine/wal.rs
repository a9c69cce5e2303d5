//! # Write-Ahead Log
//!
//! The engine's durability layer: a single sidecar file (`<db>-wal`)
//! holding a sequence of frames, each a 32-byte head plus a full page
//! image. Commits append their dirty pages as frames and mark the final
//! frame with a nonzero `commit_size`; everything after the last marker
//! is an interrupted batch and is invisible to recovery, which gives the
//! at-most-one-partial-batch guarantee.
//!
//! ## Frame Format
//!
//! ```text
//! +------------------+------------------+
//! | Frame Head       | Page Image       |
//! | (32 bytes)       | (4096 bytes)     |
//! +------------------+------------------+
//!
//! Offset  Size  Field        Notes
//! ------  ----  -----------  ----------------------------------------
//! 0       4     page_no      big-endian, like every on-disk page number
//! 4       4     commit_size  big-endian; database pages after this
//!                            frame, nonzero only on a commit marker
//! 8       8     generation   little-endian log stamp, renewed on restart
//! 16      8     sum          two-word checksum pair (same trailer
//!                            convention as a data page)
//! 24      8     reserved
//! ```
//!
//! ## Frame Integrity
//!
//! A frame checksums with the same primitive as the page trailer: the
//! page image hashes under the page-codec seeds `(page_no, seed word)`,
//! and the 16-byte head prefix then hashes under the image's output
//! words, chaining the two so neither the image nor the head fields can
//! change without tripping the pair.
//!
//! ## Recovery
//!
//! Opening scans frames from the start. The first frame fixes the log's
//! generation; a frame from another generation, a short read, or a bad
//! checksum ends the scan (normal after a crash). Frames index into the
//! page map only once a commit marker is reached, and the file is then
//! truncated back to the last commit boundary so the next batch
//! overwrites the torn tail.
//!
//! ## Checkpointing
//!
//! The pager copies the latest committed image of every indexed page into
//! the main file (`FULL`), and a `RESTART` additionally truncates the log
//! and renews the generation. The WAL itself only tracks which frames
//! have been applied.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::byteorder::{BigEndian, LittleEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::codec::PageSum;
use crate::config::{CHECKSUM_SEED, PAGE_SIZE, WAL_FRAME_HEADER_SIZE, WAL_FRAME_SIZE};
use crate::hash::hash2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FrameHead {
    page_no: U32<BigEndian>,
    commit_size: U32<BigEndian>,
    generation: U64<LittleEndian>,
    sum: PageSum,
    _reserved: [u8; 8],
}

const _: () = assert!(size_of::<FrameHead>() == WAL_FRAME_HEADER_SIZE);

/// Bytes of the head covered by the frame checksum (everything before
/// the sum itself).
const FRAME_SUM_PREFIX: usize = 16;

impl FrameHead {
    fn new(page_no: u32, commit_size: u32, generation: u64) -> Self {
        Self {
            page_no: U32::new(page_no),
            commit_size: U32::new(commit_size),
            generation: U64::new(generation),
            sum: PageSum {
                part1: U32::new(0),
                part2: U32::new(0),
            },
            _reserved: [0; 8],
        }
    }

    pub fn page_no(&self) -> u32 {
        self.page_no.get()
    }

    pub fn commit_size(&self) -> u32 {
        self.commit_size.get()
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }
}

/// Chained frame checksum: image first, head prefix second.
fn frame_sum(head: &FrameHead, image: &[u8]) -> PageSum {
    let (mid1, mid2) = hash2(image, head.page_no.get(), CHECKSUM_SEED);
    let (part1, part2) = hash2(&head.as_bytes()[..FRAME_SUM_PREFIX], mid1, mid2);

    PageSum {
        part1: U32::new(part1),
        part2: U32::new(part2),
    }
}

/// A fresh generation stamp: wall-clock nanoseconds and the process id,
/// folded through the page hash so restarted logs never share a stamp
/// with their predecessor by accident.
fn new_generation() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let (hi, lo) = hash2(&nanos.to_le_bytes(), std::process::id(), CHECKSUM_SEED);
    ((hi as u64) << 32) | lo as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Off,
    Normal,
    Full,
}

#[derive(Debug)]
pub struct Wal {
    #[allow(dead_code)]
    path: PathBuf,
    file: File,
    generation: u64,
    /// Frames up to and including the last commit marker.
    committed_frames: u64,
    /// Latest committed frame offset per page.
    page_index: HashMap<u32, u64>,
    /// Database size recorded by the last commit marker (0 = none).
    committed_db_size: u32,
    /// Frames already copied into the main file by a checkpoint.
    applied_frames: u64,
    sync_mode: SyncMode,
}

impl Wal {
    /// Sidecar path for a database file: `<db>-wal`.
    pub fn sidecar_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push("-wal");
        PathBuf::from(name)
    }

    /// Opens (or creates) the log and recovers its committed prefix.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open WAL at '{}'", path.display()))?;

        let mut wal = Self {
            path: path.to_path_buf(),
            file: file
                .try_clone()
                .wrap_err("failed to clone WAL handle")?,
            generation: new_generation(),
            committed_frames: 0,
            page_index: HashMap::new(),
            committed_db_size: 0,
            applied_frames: 0,
            sync_mode: SyncMode::Normal,
        };

        wal.recover_scan(&mut file)?;

        // Drop any torn tail so the next batch starts at the commit
        // boundary.
        file.set_len(wal.committed_frames * WAL_FRAME_SIZE as u64)
            .wrap_err("failed to truncate WAL to last commit boundary")?;

        Ok(wal)
    }

    fn recover_scan(&mut self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0)).wrap_err("failed to seek WAL")?;

        let mut head_buf = [0u8; WAL_FRAME_HEADER_SIZE];
        let mut image_buf = vec![0u8; PAGE_SIZE];
        let mut pending: Vec<(u32, u64)> = Vec::new();
        let mut frames_seen = 0u64;
        let mut log_generation = None;

        loop {
            let offset = frames_seen * WAL_FRAME_SIZE as u64;

            if file.read_exact(&mut head_buf).is_err() {
                break;
            }
            let head = FrameHead::read_from_bytes(&head_buf)
                .map_err(|e| eyre::eyre!("failed to decode WAL frame head: {:?}", e))?;

            if file.read_exact(&mut image_buf).is_err() {
                break;
            }

            // The first frame fixes the log generation; anything stamped
            // differently is a leftover from an earlier log life.
            let generation = *log_generation.get_or_insert(head.generation());
            if head.generation() != generation {
                break;
            }

            if frame_sum(&head, &image_buf) != head.sum {
                break;
            }

            frames_seen += 1;
            pending.push((head.page_no(), offset));

            if head.commit_size() != 0 {
                for (page_no, frame_offset) in pending.drain(..) {
                    self.page_index.insert(page_no, frame_offset);
                }
                self.committed_frames = frames_seen;
                self.committed_db_size = head.commit_size();
            }
        }

        if self.committed_frames > 0 {
            if let Some(generation) = log_generation {
                self.generation = generation;
            }
        }

        Ok(())
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        self.sync_mode = mode;
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn committed_frame_count(&self) -> u64 {
        self.committed_frames
    }

    pub fn unapplied_frame_count(&self) -> u64 {
        self.committed_frames - self.applied_frames
    }

    pub fn committed_db_size(&self) -> u32 {
        self.committed_db_size
    }

    pub fn contains_page(&self, page_no: u32) -> bool {
        self.page_index.contains_key(&page_no)
    }

    /// Appends one batch of page images and commits it atomically: the
    /// final frame carries `db_size` as the commit marker, and the index
    /// is updated only after the batch (and its fsync) succeeds.
    pub fn append_commit(&mut self, frames: &[(u32, &[u8])], db_size: u32) -> Result<()> {
        ensure!(!frames.is_empty(), "empty commit batch");
        ensure!(db_size != 0, "commit marker requires a nonzero db size");

        let start = self.committed_frames * WAL_FRAME_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(start))
            .wrap_err("failed to seek WAL for append")?;

        for (i, (page_no, image)) in frames.iter().enumerate() {
            ensure!(
                image.len() == PAGE_SIZE,
                "WAL frame for page {} is {} bytes",
                page_no,
                image.len()
            );

            let marker = if i + 1 == frames.len() { db_size } else { 0 };
            let mut head = FrameHead::new(*page_no, marker, self.generation);
            head.sum = frame_sum(&head, image);

            self.file
                .write_all(head.as_bytes())
                .wrap_err("failed to write WAL frame head")?;
            self.file
                .write_all(image)
                .wrap_err("failed to write WAL frame image")?;
        }

        if self.sync_mode != SyncMode::Off {
            self.file.sync_data().wrap_err("failed to sync WAL")?;
        }

        for (i, (page_no, _)) in frames.iter().enumerate() {
            let offset = start + i as u64 * WAL_FRAME_SIZE as u64;
            self.page_index.insert(*page_no, offset);
        }
        self.committed_frames += frames.len() as u64;
        self.committed_db_size = db_size;

        Ok(())
    }

    /// Reads the latest committed image of `page_no`, if the log has one.
    pub fn read_page(&mut self, page_no: u32) -> Result<Option<Vec<u8>>> {
        let offset = match self.page_index.get(&page_no) {
            Some(&offset) => offset,
            None => return Ok(None),
        };

        let (head, image) = self.read_frame_at(offset)?;
        ensure!(
            head.page_no() == page_no,
            "WAL index points page {} at a frame for page {}",
            page_no,
            head.page_no()
        );

        Ok(Some(image))
    }

    fn read_frame_at(&mut self, offset: u64) -> Result<(FrameHead, Vec<u8>)> {
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek WAL frame")?;

        let mut head_buf = [0u8; WAL_FRAME_HEADER_SIZE];
        self.file
            .read_exact(&mut head_buf)
            .wrap_err("failed to read WAL frame head")?;
        let head = FrameHead::read_from_bytes(&head_buf)
            .map_err(|e| eyre::eyre!("failed to decode WAL frame head: {:?}", e))?;

        let mut image = vec![0u8; PAGE_SIZE];
        self.file
            .read_exact(&mut image)
            .wrap_err("failed to read WAL frame image")?;

        ensure!(
            frame_sum(&head, &image) == head.sum,
            "WAL frame at offset {} failed checksum validation",
            offset
        );

        Ok((head, image))
    }

    /// Snapshot of the committed page set for a checkpoint pass.
    pub fn checkpoint_set(&self) -> Vec<(u32, u64)> {
        let mut set: Vec<(u32, u64)> = self
            .page_index
            .iter()
            .map(|(&page_no, &offset)| (page_no, offset))
            .collect();
        set.sort_unstable_by_key(|&(page_no, _)| page_no);
        set
    }

    /// Reads the page image for a checkpoint entry.
    pub fn page_at(&mut self, offset: u64) -> Result<(u32, Vec<u8>)> {
        let (head, image) = self.read_frame_at(offset)?;
        Ok((head.page_no(), image))
    }

    /// Records that every committed frame has been copied to the main
    /// file.
    pub fn mark_applied(&mut self) {
        self.applied_frames = self.committed_frames;
    }

    /// Restarts the log: truncate, clear the index, renew the
    /// generation. Callers must have applied all committed frames first.
    pub fn reset(&mut self) -> Result<()> {
        ensure!(
            self.applied_frames == self.committed_frames,
            "cannot restart WAL with {} unapplied frames",
            self.committed_frames - self.applied_frames
        );

        self.file
            .set_len(0)
            .wrap_err("failed to truncate WAL on restart")?;
        if self.sync_mode != SyncMode::Off {
            self.file.sync_data().wrap_err("failed to sync WAL truncate")?;
        }

        self.page_index.clear();
        self.committed_frames = 0;
        self.applied_frames = 0;
        self.committed_db_size = 0;
        self.generation = new_generation();

        Ok(())
    }
}
