use anyhow::{ensure, Result};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::memtable::ValueRecord;
use crate::sstable::format::{write_footer, TOMBSTONE_LEN};

/// Writes a sorted snapshot to disk as an immutable SSTable file.
///
/// The writer is stateless; all work happens in the single associated
/// function [`write`](SstableWriter::write). The caller passes the tmp
/// path; the file is fsynced before returning and the caller performs the
/// atomic rename into place, so a crash mid-write leaves only an
/// unreferenced tmp file behind.
pub struct SstableWriter;

impl SstableWriter {
    /// Streams `entries` (already key-sorted) to `path`, recording a sparse
    /// index entry for every `sparse_every`-th data record.
    ///
    /// An empty snapshot produces a valid table with an empty data and
    /// index section; compaction can legitimately reduce everything to
    /// tombstones and end up here with nothing left.
    pub fn write(
        path: &Path,
        entries: &BTreeMap<Vec<u8>, ValueRecord>,
        sparse_every: usize,
    ) -> Result<()> {
        ensure!(sparse_every > 0, "sparse_every must be > 0");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        // In-memory sparse index: (key, offset of the record's header)
        let mut index: Vec<(&[u8], u64)> = Vec::new();
        let mut offset = 0u64;

        for (i, (key, record)) in entries.iter().enumerate() {
            if i % sparse_every == 0 {
                index.push((key.as_slice(), offset));
            }

            file.write_i32::<BigEndian>(key.len() as i32)?;
            match record {
                ValueRecord::Present(value) => {
                    file.write_i32::<BigEndian>(value.len() as i32)?;
                    file.write_all(key)?;
                    file.write_all(value)?;
                    offset += 8 + key.len() as u64 + value.len() as u64;
                }
                ValueRecord::Tombstone => {
                    file.write_i32::<BigEndian>(TOMBSTONE_LEN)?;
                    file.write_all(key)?;
                    offset += 8 + key.len() as u64;
                }
            }
        }

        let index_offset = offset;
        for (key, data_offset) in &index {
            file.write_i32::<BigEndian>(key.len() as i32)?;
            file.write_all(key)?;
            file.write_i64::<BigEndian>(*data_offset as i64)?;
        }

        write_footer(&mut file, index_offset, index.len() as u32)?;

        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
