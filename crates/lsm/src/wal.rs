//! Append-only write-ahead log of logical put/delete records.
//!
//! Record layout (big-endian):
//!
//! ```text
//! [key_len: i32][val_len: i32][key bytes][value bytes?]
//! ```
//!
//! `val_len == -1` encodes a tombstone and the value bytes are absent.
//! Every append is fsynced before returning, so a successful `put` on the
//! engine is durable by the time the caller sees it. The log is truncated
//! after each successful flush checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tracing::debug;

use crate::memtable::Memtable;

/// Sentinel in the `val_len` header field marking a delete record.
const TOMBSTONE_LEN: i32 = -1;
/// Replay rejects key lengths outside `(0, MAX_KEY_LEN]`.
const MAX_KEY_LEN: i32 = 10_000_000;
/// Replay rejects value lengths outside `[-1, MAX_VAL_LEN]`.
const MAX_VAL_LEN: i32 = 100_000_000;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt wal: {0}")]
    Corrupt(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// The log holds a single append-mode handle for its lifetime. Truncation
/// via `set_len` composes with append mode: the next write repositions to
/// the (new) end of file.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a PUT record and fsyncs.
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        if value.len() > MAX_VAL_LEN as usize {
            return Err(WalError::InvalidRecord(format!(
                "value too large: {} bytes",
                value.len()
            )));
        }
        self.append_record(key, Some(value))
    }

    /// Appends a DELETE (tombstone) record and fsyncs.
    pub fn append_delete(&mut self, key: &[u8]) -> Result<(), WalError> {
        self.append_record(key, None)
    }

    fn append_record(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), WalError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN as usize {
            return Err(WalError::InvalidRecord(format!(
                "bad key length: {}",
                key.len()
            )));
        }

        let mut buf = Vec::with_capacity(8 + key.len() + value.map_or(0, <[u8]>::len));
        buf.write_i32::<BigEndian>(key.len() as i32)?;
        match value {
            Some(v) => buf.write_i32::<BigEndian>(v.len() as i32)?,
            None => buf.write_i32::<BigEndian>(TOMBSTONE_LEN)?,
        }
        buf.extend_from_slice(key);
        if let Some(v) = value {
            buf.extend_from_slice(v);
        }

        self.file.write_all(&buf)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays the log into `mem` from offset zero.
    ///
    /// A record whose header, key, or value does not completely land before
    /// end-of-file is a torn tail: the natural result of a crash mid-append.
    /// Replay stops there cleanly. Lengths outside the sanity bounds are
    /// corruption and fail the replay. Returns the number of records applied.
    pub fn replay_into(&self, mem: &mut Memtable) -> Result<usize, WalError> {
        let mut rdr = BufReader::new(File::open(&self.path)?);
        let mut applied = 0usize;

        loop {
            let key_len = match rdr.read_i32::<BigEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // end of log
                Err(e) => return Err(e.into()),
            };
            let val_len = match rdr.read_i32::<BigEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("torn record header, ignoring tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if key_len <= 0 || key_len > MAX_KEY_LEN {
                return Err(WalError::Corrupt(format!("bad key_len={key_len}")));
            }
            if val_len < TOMBSTONE_LEN || val_len > MAX_VAL_LEN {
                return Err(WalError::Corrupt(format!("bad val_len={val_len}")));
            }

            let mut key = vec![0u8; key_len as usize];
            match rdr.read_exact(&mut key) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(key_len, "torn key bytes, ignoring tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if val_len == TOMBSTONE_LEN {
                mem.delete(key);
                applied += 1;
                continue;
            }

            let mut value = vec![0u8; val_len as usize];
            match rdr.read_exact(&mut value) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(val_len, "torn value bytes, ignoring tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            mem.put(key, value);
            applied += 1;
        }

        debug!(applied, "wal replay complete");
        Ok(applied)
    }

    /// Truncates the log to zero bytes after a successful checkpoint.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        Ok(())
    }
}
