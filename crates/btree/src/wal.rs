//! Redo-only write-ahead log of full page images.
//!
//! Record layout (big-endian):
//!
//! ```text
//! [page_id: i32][page_size: i32][page bytes: page_size][crc32: u32]
//! ```
//!
//! The page size is embedded so the log is self-describing, and the CRC-32
//! covers `(page_id, page_size, page bytes)` so a torn or corrupted tail
//! record is recognized during replay. The log is truncated after every
//! successful commit checkpoint; under the single-writer model nothing
//! else ever opens it for writing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::error::{BtreeError, Result};
use crate::pagefile::PageFile;

/// Replay rejects page sizes outside `(0, MAX_WAL_PAGE_SIZE]`.
const MAX_WAL_PAGE_SIZE: i32 = 1_000_000;

#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one full page image. Durability is the caller's move:
    /// append the whole batch, then [`sync`](Self::sync) once.
    pub fn append_page(&mut self, page_id: u32, page: &[u8]) -> Result<()> {
        if page.is_empty() || page.len() > MAX_WAL_PAGE_SIZE as usize {
            return Err(BtreeError::InvalidInput(format!(
                "bad page image size: {}",
                page.len()
            )));
        }

        let mut header = [0u8; 8];
        BigEndian::write_i32(&mut header[0..4], page_id as i32);
        BigEndian::write_i32(&mut header[4..8], page.len() as i32);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(page);
        let crc = hasher.finalize();

        let mut record = Vec::with_capacity(8 + page.len() + 4);
        record.extend_from_slice(&header);
        record.extend_from_slice(page);
        record.extend_from_slice(&crc.to_be_bytes());
        self.file.write_all(&record)?;
        Ok(())
    }

    /// Fsyncs the log. Call before applying the batch to the page file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays every intact record into `page_file` in append order.
    ///
    /// Stops cleanly when the header, payload, or CRC would cross
    /// end-of-file, or when the recomputed CRC disagrees with the stored
    /// one; both are the signature of a crash mid-append. Out-of-bounds
    /// header fields anywhere are corruption. Returns the number of page
    /// images applied.
    pub fn replay_into(&self, page_file: &mut PageFile) -> Result<usize> {
        let data = fs::read(&self.path)?;
        let mut pos = 0usize;
        let mut applied = 0usize;

        while pos < data.len() {
            if pos + 8 > data.len() {
                break; // torn header
            }
            let page_id = BigEndian::read_i32(&data[pos..pos + 4]);
            let page_size = BigEndian::read_i32(&data[pos + 4..pos + 8]);

            if page_id < 0 {
                return Err(BtreeError::Corrupt(format!("bad wal page_id={page_id}")));
            }
            if page_size <= 0 || page_size > MAX_WAL_PAGE_SIZE {
                return Err(BtreeError::Corrupt(format!(
                    "bad wal page_size={page_size}"
                )));
            }

            let payload_start = pos + 8;
            let crc_start = payload_start + page_size as usize;
            if crc_start + 4 > data.len() {
                break; // torn payload or crc
            }

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&data[pos..payload_start]);
            hasher.update(&data[payload_start..crc_start]);
            let stored = BigEndian::read_u32(&data[crc_start..crc_start + 4]);
            if hasher.finalize() != stored {
                debug!(pos, "crc mismatch, ignoring tail");
                break;
            }

            page_file.write_page(page_id as u32, &data[payload_start..crc_start])?;
            applied += 1;
            pos = crc_start + 4;
        }

        debug!(applied, "wal replay complete");
        Ok(applied)
    }

    /// Truncates the log to zero bytes after a successful checkpoint.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }
}
