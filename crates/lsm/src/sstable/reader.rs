use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::memtable::ValueRecord;
use crate::sstable::format::{
    read_footer, FOOTER_BYTES, MAX_INDEX_KEY_LEN, MAX_KEY_LEN, MAX_VAL_LEN, SSTABLE_MAGIC,
    TOMBSTONE_LEN,
};

/// One sparse index entry: the key of a data record and the byte offset of
/// that record's header in the data section.
#[derive(Debug, Clone)]
struct IndexEntry {
    key: Vec<u8>,
    offset: u64,
}

/// Validated footer fields.
#[derive(Debug, Clone, Copy)]
struct Footer {
    index_offset: u64,
    index_count: u32,
}

/// Reads an SSTable for point lookups.
///
/// On [`open`](SstableReader::open) the footer is validated and the sparse
/// index is loaded into memory. The data file is **not** kept open between
/// lookups: each [`get`](SstableReader::get) opens the file, scans from
/// the floor index entry, and closes the handle, which keeps the engine
/// free of long-lived per-table descriptors.
pub struct SstableReader {
    path: PathBuf,
    index: Vec<IndexEntry>,
    index_offset: u64,
}

impl SstableReader {
    /// Opens an SSTable and loads its sparse index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file =
            File::open(&path).with_context(|| format!("open sstable {}", path.display()))?;

        let footer = Self::load_footer(&mut file)?;
        let index = Self::load_index(&mut file, footer)?;

        Ok(Self {
            path,
            index,
            index_offset: footer.index_offset,
        })
    }

    fn load_footer(file: &mut File) -> Result<Footer> {
        let size = file.metadata()?.len();
        if size < FOOTER_BYTES {
            bail!("sstable too small for footer: {size} bytes");
        }

        file.seek(SeekFrom::Start(size - FOOTER_BYTES))?;
        let (index_offset, index_count, magic) = read_footer(file)?;

        if magic != SSTABLE_MAGIC {
            bail!("bad sstable magic: expected {SSTABLE_MAGIC:#x}, got {magic:#x}");
        }
        if index_offset < 0 || index_offset as u64 > size - FOOTER_BYTES {
            bail!("bad index_offset={index_offset}");
        }
        if index_count < 0 {
            bail!("bad index_count={index_count}");
        }

        Ok(Footer {
            index_offset: index_offset as u64,
            index_count: index_count as u32,
        })
    }

    fn load_index(file: &mut File, footer: Footer) -> Result<Vec<IndexEntry>> {
        file.seek(SeekFrom::Start(footer.index_offset))?;

        let mut index = Vec::with_capacity(footer.index_count as usize);
        for _ in 0..footer.index_count {
            let key_len = file.read_i32::<BigEndian>()?;
            if key_len <= 0 || key_len > MAX_INDEX_KEY_LEN {
                bail!("bad index key length: {key_len}");
            }
            let mut key = vec![0u8; key_len as usize];
            file.read_exact(&mut key)?;
            let offset = file.read_i64::<BigEndian>()?;
            if offset < 0 {
                bail!("bad index offset: {offset}");
            }
            index.push(IndexEntry {
                key,
                offset: offset as u64,
            });
        }
        Ok(index)
    }

    /// Point lookup: returns the table's record for `key`, which may be a
    /// tombstone, or `None` when the table does not contain the key at all.
    ///
    /// Scans forward from the greatest index entry `<=` the target (offset
    /// zero when none), stopping at an exact hit, at the first key past the
    /// target, or at the index section boundary.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueRecord>> {
        let start = self.floor_offset(key);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;

        let mut pos = start;
        while pos < self.index_offset {
            if pos + 8 > self.index_offset {
                bail!("corrupt sstable: record header crosses into index section");
            }
            let key_len = file.read_i32::<BigEndian>()?;
            let val_len = file.read_i32::<BigEndian>()?;
            pos += 8;

            if key_len <= 0 || key_len > MAX_KEY_LEN {
                bail!("bad key_len={key_len}");
            }
            if pos + key_len as u64 > self.index_offset {
                bail!("corrupt sstable: key crosses into index section");
            }
            let mut record_key = vec![0u8; key_len as usize];
            file.read_exact(&mut record_key)?;
            pos += key_len as u64;

            if val_len == TOMBSTONE_LEN {
                match record_key.as_slice().cmp(key) {
                    std::cmp::Ordering::Equal => return Ok(Some(ValueRecord::Tombstone)),
                    std::cmp::Ordering::Greater => return Ok(None), // keys are sorted
                    std::cmp::Ordering::Less => continue,
                }
            }

            if val_len < 0 || val_len > MAX_VAL_LEN {
                bail!("bad val_len={val_len}");
            }
            if pos + val_len as u64 > self.index_offset {
                bail!("corrupt sstable: value crosses into index section");
            }

            match record_key.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => {
                    let mut value = vec![0u8; val_len as usize];
                    file.read_exact(&mut value)?;
                    return Ok(Some(ValueRecord::Present(value)));
                }
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => {
                    file.seek(SeekFrom::Current(val_len as i64))?;
                    pos += val_len as u64;
                }
            }
        }

        Ok(None)
    }

    /// Sequentially decodes the whole data section into an ordered map.
    /// Used by compaction, which needs every record including tombstones.
    pub fn read_all<P: AsRef<Path>>(path: P) -> Result<BTreeMap<Vec<u8>, ValueRecord>> {
        let mut file = File::open(path.as_ref())?;
        let footer = Self::load_footer(&mut file)?;

        file.seek(SeekFrom::Start(0))?;
        let mut result = BTreeMap::new();
        let mut pos = 0u64;

        while pos < footer.index_offset {
            if pos + 8 > footer.index_offset {
                bail!("corrupt sstable: record header crosses into index section");
            }
            let key_len = file.read_i32::<BigEndian>()?;
            let val_len = file.read_i32::<BigEndian>()?;
            pos += 8;

            if key_len <= 0 || key_len > MAX_KEY_LEN {
                bail!("bad key_len={key_len}");
            }
            if pos + key_len as u64 > footer.index_offset {
                bail!("corrupt sstable: key crosses into index section");
            }
            let mut key = vec![0u8; key_len as usize];
            file.read_exact(&mut key)?;
            pos += key_len as u64;

            if val_len == TOMBSTONE_LEN {
                result.insert(key, ValueRecord::Tombstone);
                continue;
            }

            if val_len < 0 || val_len > MAX_VAL_LEN {
                bail!("bad val_len={val_len}");
            }
            if pos + val_len as u64 > footer.index_offset {
                bail!("corrupt sstable: value crosses into index section");
            }
            let mut value = vec![0u8; val_len as usize];
            file.read_exact(&mut value)?;
            pos += val_len as u64;

            result.insert(key, ValueRecord::Present(value));
        }

        Ok(result)
    }

    /// Greatest index entry `<=` the target key, or offset zero when the
    /// target sorts before every indexed key.
    fn floor_offset(&self, key: &[u8]) -> u64 {
        match self
            .index
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
        {
            Ok(i) => self.index[i].offset,
            Err(0) => 0,
            Err(i) => self.index[i - 1].offset,
        }
    }

    /// Number of sparse index entries.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// The indexed keys in ascending order. Useful for inspection in tests.
    pub fn index_keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.iter().map(|e| e.key.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::writer::SstableWriter;
    use std::fs;
    use tempfile::tempdir;

    fn write_sample(dir: &Path, name: &str, sparse_every: usize) -> PathBuf {
        let mut entries = BTreeMap::new();
        entries.insert(b"a".to_vec(), ValueRecord::Present(b"apple".to_vec()));
        entries.insert(b"b".to_vec(), ValueRecord::Present(b"banana".to_vec()));
        entries.insert(b"c".to_vec(), ValueRecord::Present(Vec::new()));
        entries.insert(b"d".to_vec(), ValueRecord::Tombstone);

        let path = dir.join(name);
        SstableWriter::write(&path, &entries, sparse_every).unwrap();
        path
    }

    // -------------------- Open & point lookups --------------------

    #[test]
    fn open_and_get_entries() {
        let dir = tempdir().unwrap();
        let path = write_sample(dir.path(), "sample.dat", 4);
        let reader = SstableReader::open(&path).unwrap();

        assert_eq!(
            reader.get(b"a").unwrap(),
            Some(ValueRecord::Present(b"apple".to_vec()))
        );
        assert_eq!(
            reader.get(b"b").unwrap(),
            Some(ValueRecord::Present(b"banana".to_vec()))
        );
        // empty value stays distinct from a tombstone
        assert_eq!(
            reader.get(b"c").unwrap(),
            Some(ValueRecord::Present(Vec::new()))
        );
        assert_eq!(reader.get(b"d").unwrap(), Some(ValueRecord::Tombstone));
        // absent key: no record at all
        assert_eq!(reader.get(b"nope").unwrap(), None);
        // key past the last record
        assert_eq!(reader.get(b"zzz").unwrap(), None);
    }

    #[test]
    fn sparse_index_holds_every_nth_key() {
        let dir = tempdir().unwrap();
        let mut entries = BTreeMap::new();
        for i in 1..=10u32 {
            entries.insert(
                format!("a{i}").into_bytes(),
                ValueRecord::Present(format!("v{i}").into_bytes()),
            );
        }
        let path = dir.path().join("sparse.dat");
        SstableWriter::write(&path, &entries, 4).unwrap();

        let reader = SstableReader::open(&path).unwrap();
        // sorted order is a1, a10, a2 .. a9; records 0, 4, 8 are indexed
        let indexed: Vec<_> = reader.index_keys().collect();
        assert_eq!(indexed, [b"a1".as_slice(), b"a4".as_slice(), b"a8".as_slice()]);
        assert_eq!(reader.index_len(), 3);

        // every key is still reachable through a forward scan
        for i in 1..=10u32 {
            let key = format!("a{i}").into_bytes();
            assert_eq!(
                reader.get(&key).unwrap(),
                Some(ValueRecord::Present(format!("v{i}").into_bytes())),
                "a{i}"
            );
        }
    }

    #[test]
    fn lookup_between_index_entries_scans_forward() {
        let dir = tempdir().unwrap();
        let mut entries = BTreeMap::new();
        for key in ["a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8", "a9"] {
            entries.insert(key.as_bytes().to_vec(), ValueRecord::Present(b"v".to_vec()));
        }
        let path = dir.path().join("scan.dat");
        SstableWriter::write(&path, &entries, 4).unwrap();

        let reader = SstableReader::open(&path).unwrap();
        let indexed: Vec<_> = reader.index_keys().collect();
        assert_eq!(indexed, [b"a1".as_slice(), b"a5".as_slice(), b"a9".as_slice()]);

        // a7 starts its scan at a5's offset and walks forward to the hit
        assert_eq!(
            reader.get(b"a7").unwrap(),
            Some(ValueRecord::Present(b"v".to_vec()))
        );
        // a45 sorts between indexed keys and does not exist
        assert_eq!(reader.get(b"a45").unwrap(), None);
    }

    // -------------------- read_all --------------------

    #[test]
    fn read_all_round_trips_every_record() {
        let dir = tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(b"x".to_vec(), ValueRecord::Present(b"1".to_vec()));
        entries.insert(b"y".to_vec(), ValueRecord::Tombstone);
        entries.insert(b"z".to_vec(), ValueRecord::Present(Vec::new()));

        let path = dir.path().join("all.dat");
        SstableWriter::write(&path, &entries, 2).unwrap();

        assert_eq!(SstableReader::read_all(&path).unwrap(), entries);
    }

    #[test]
    fn read_all_of_empty_table_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        SstableWriter::write(&path, &BTreeMap::new(), 4).unwrap();
        assert!(SstableReader::read_all(&path).unwrap().is_empty());
    }

    // -------------------- Sorted invariants --------------------

    #[test]
    fn data_and_index_keys_are_sorted() {
        let dir = tempdir().unwrap();
        let mut entries = BTreeMap::new();
        for key in ["m", "a", "z", "q", "b", "f"] {
            entries.insert(key.as_bytes().to_vec(), ValueRecord::Present(b"v".to_vec()));
        }
        let path = dir.path().join("sorted.dat");
        SstableWriter::write(&path, &entries, 2).unwrap();

        let all = SstableReader::read_all(&path).unwrap();
        let data_keys: Vec<_> = all.keys().cloned().collect();
        let mut sorted = data_keys.clone();
        sorted.sort();
        assert_eq!(data_keys, sorted);

        let reader = SstableReader::open(&path).unwrap();
        let index_keys: Vec<_> = reader.index_keys().map(<[u8]>::to_vec).collect();
        let mut index_sorted = index_keys.clone();
        index_sorted.sort();
        assert_eq!(index_keys, index_sorted);
        // index keys are a subset of data keys
        for k in &index_keys {
            assert!(all.contains_key(k));
        }
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn open_file_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.dat");
        fs::write(&path, b"short").unwrap();
        assert!(SstableReader::open(&path).is_err());
    }

    #[test]
    fn open_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badmagic.dat");

        let mut data = Vec::new();
        data.extend_from_slice(&0i64.to_be_bytes()); // index_offset
        data.extend_from_slice(&0i32.to_be_bytes()); // index_count
        data.extend_from_slice(&[0xBA, 0xAD, 0xF0, 0x0D]); // wrong magic
        fs::write(&path, &data).unwrap();

        assert!(SstableReader::open(&path).is_err());
    }

    #[test]
    fn open_index_offset_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badoffset.dat");

        let mut data = Vec::new();
        data.extend_from_slice(&999i64.to_be_bytes()); // past the file
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&SSTABLE_MAGIC.to_be_bytes());
        fs::write(&path, &data).unwrap();

        assert!(SstableReader::open(&path).is_err());
    }

    #[test]
    fn record_crossing_index_section_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crossing.dat");

        // One record whose declared value length runs past the data section.
        let mut data = Vec::new();
        data.extend_from_slice(&1i32.to_be_bytes()); // key_len
        data.extend_from_slice(&100i32.to_be_bytes()); // val_len, way too long
        data.push(b'k');
        let index_offset = data.len() as i64;
        data.extend_from_slice(&index_offset.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&SSTABLE_MAGIC.to_be_bytes());
        fs::write(&path, &data).unwrap();

        assert!(SstableReader::read_all(&path).is_err());
    }
}
