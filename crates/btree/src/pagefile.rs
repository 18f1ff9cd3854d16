//! Random-access file of fixed-size pages.
//!
//! Page `id` lives at byte offset `id * page_size`. The engine owns one
//! long-lived read/write handle for its whole lifetime; it closes on drop.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{BtreeError, Result};

#[derive(Debug)]
pub struct PageFile {
    file: File,
    page_size: usize,
}

impl PageFile {
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Whether the file extends far enough to contain page `id`. The
    /// explicit probe keeps "page not there yet" out of the error path
    /// during bootstrap.
    pub fn has_page(&self, id: u32) -> Result<bool> {
        let len = self.file.metadata()?.len();
        Ok((id as u64 + 1) * self.page_size as u64 <= len)
    }

    /// Reads exactly one page. A short read means the page was never
    /// written, which is [`BtreeError::PageMissing`].
    pub fn read_page(&mut self, id: u32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(self.offset_of(id)))?;
        let mut buf = vec![0u8; self.page_size];
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                BtreeError::PageMissing(id)
            } else {
                BtreeError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Writes one full page image in place.
    pub fn write_page(&mut self, id: u32, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(BtreeError::InvalidInput(format!(
                "page image is {} bytes, page size is {}",
                data.len(),
                self.page_size
            )));
        }
        self.file.seek(SeekFrom::Start(self.offset_of(id)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Forces written pages to the storage device.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn offset_of(&self, id: u32) -> u64 {
        id as u64 * self.page_size as u64
    }
}
