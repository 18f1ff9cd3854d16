//! Full compaction: merge every live SSTable into one.
//!
//! The simple all-into-one design accepts high write amplification in
//! exchange for a key property: because no older table survives, every
//! tombstone can be dropped from the output. Newest-wins is realized by
//! visiting tables newest first and skipping keys already merged.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::manifest::Manifest;
use crate::memtable::ValueRecord;
use crate::sstable::{SstableReader, SstableWriter};

/// Merges all live SSTables into a single new table, swaps the manifest to
/// it atomically, and deletes the inputs best-effort.
///
/// Crash windows: before the manifest swap the output is an unreferenced
/// orphan and the old tables stay live; after the swap but before deletion
/// the old tables are dangling files no read path consults. Neither window
/// loses data.
pub fn compact_all(data_dir: &Path, manifest: &mut Manifest, sparse_every: usize) -> Result<()> {
    let sst_dir = data_dir.join("sst");

    let input_names = manifest.sstables_oldest_to_newest().to_vec();
    if input_names.len() < 2 {
        debug!(inputs = input_names.len(), "compaction skipped: not enough tables");
        return Ok(());
    }

    let input_paths: Vec<_> = input_names.iter().map(|n| sst_dir.join(n)).collect();
    let input_bytes: u64 = input_paths
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let id = manifest.next_id();
    let out_name = format!("sst-{id:06}.dat");
    let out = sst_dir.join(&out_name);
    let tmp = sst_dir.join(format!("{out_name}.tmp"));

    info!(
        inputs = input_names.len(),
        input_bytes, out = %out_name, "compaction started"
    );

    // Merge newest to oldest; the first table to mention a key wins and
    // older occurrences are shadowed.
    let mut merged: BTreeMap<Vec<u8>, ValueRecord> = BTreeMap::new();
    let mut records_read = 0usize;
    let mut shadowed = 0usize;

    for path in manifest.sstables_newest_first(&sst_dir) {
        let entries = SstableReader::read_all(&path)?;
        records_read += entries.len();

        let mut shadowed_in_file = 0usize;
        for (key, record) in entries {
            if merged.contains_key(&key) {
                shadowed += 1;
                shadowed_in_file += 1;
                continue;
            }
            merged.insert(key, record);
        }
        debug!(file = %path.display(), shadowed_in_file, merged = merged.len(), "table merged");
    }

    // Tombstones only survive to shadow older tables; with every table
    // merged there is nothing left to shadow.
    let before = merged.len();
    merged.retain(|_, record| !record.is_tombstone());
    let tombstones_dropped = before - merged.len();

    info!(
        records_read,
        shadowed,
        tombstones_dropped,
        kept = merged.len(),
        "merge complete"
    );

    SstableWriter::write(&tmp, &merged, sparse_every)?;
    fs::rename(&tmp, &out)?;

    manifest.replace_all_with(out_name.clone());
    manifest.persist_atomically(&data_dir.join("manifest.txt"))?;

    let mut deleted = 0usize;
    for path in &input_paths {
        if fs::remove_file(path).is_ok() {
            deleted += 1;
        }
    }

    info!(out = %out_name, deleted, "compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_table(
        data_dir: &Path,
        manifest: &mut Manifest,
        entries: &[(&str, Option<&str>)],
    ) -> String {
        let id = manifest.next_id();
        let name = format!("sst-{id:06}.dat");
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            let record = match v {
                Some(v) => ValueRecord::Present(v.as_bytes().to_vec()),
                None => ValueRecord::Tombstone,
            };
            map.insert(k.as_bytes().to_vec(), record);
        }
        SstableWriter::write(&data_dir.join("sst").join(&name), &map, 4).unwrap();
        manifest.add_sstable(name.clone());
        name
    }

    fn setup(dir: &Path) -> Manifest {
        fs::create_dir_all(dir.join("sst")).unwrap();
        Manifest::load_or_create(&dir.join("manifest.txt")).unwrap()
    }

    #[test]
    fn newest_value_wins_and_inputs_are_deleted() {
        let dir = tempdir().unwrap();
        let mut manifest = setup(dir.path());

        let old = write_table(dir.path(), &mut manifest, &[("k", Some("old")), ("a", Some("1"))]);
        let new = write_table(dir.path(), &mut manifest, &[("k", Some("new"))]);

        compact_all(dir.path(), &mut manifest, 4).unwrap();

        assert_eq!(manifest.sstable_count(), 1);
        let survivor = &manifest.sstables_oldest_to_newest()[0];
        let merged = SstableReader::read_all(dir.path().join("sst").join(survivor)).unwrap();
        assert_eq!(
            merged.get(b"k".as_slice()),
            Some(&ValueRecord::Present(b"new".to_vec()))
        );
        assert_eq!(
            merged.get(b"a".as_slice()),
            Some(&ValueRecord::Present(b"1".to_vec()))
        );

        assert!(!dir.path().join("sst").join(old).exists());
        assert!(!dir.path().join("sst").join(new).exists());
    }

    #[test]
    fn tombstones_are_dropped_from_the_output() {
        let dir = tempdir().unwrap();
        let mut manifest = setup(dir.path());

        write_table(dir.path(), &mut manifest, &[("k", Some("v")), ("x", Some("y"))]);
        write_table(dir.path(), &mut manifest, &[("k", None)]); // newer delete

        compact_all(dir.path(), &mut manifest, 4).unwrap();

        let survivor = &manifest.sstables_oldest_to_newest()[0];
        let merged = SstableReader::read_all(dir.path().join("sst").join(survivor)).unwrap();
        assert!(merged.get(b"k".as_slice()).is_none()); // gone, not a tombstone
        assert_eq!(
            merged.get(b"x".as_slice()),
            Some(&ValueRecord::Present(b"y".to_vec()))
        );
    }

    #[test]
    fn single_table_is_left_alone() {
        let dir = tempdir().unwrap();
        let mut manifest = setup(dir.path());

        let only = write_table(dir.path(), &mut manifest, &[("k", Some("v"))]);
        compact_all(dir.path(), &mut manifest, 4).unwrap();

        assert_eq!(manifest.sstables_oldest_to_newest(), &[only.clone()]);
        assert!(dir.path().join("sst").join(only).exists());
    }

    #[test]
    fn manifest_on_disk_references_only_the_output() {
        let dir = tempdir().unwrap();
        let mut manifest = setup(dir.path());

        write_table(dir.path(), &mut manifest, &[("a", Some("1"))]);
        write_table(dir.path(), &mut manifest, &[("b", Some("2"))]);
        manifest.persist_atomically(&dir.path().join("manifest.txt")).unwrap();

        compact_all(dir.path(), &mut manifest, 4).unwrap();

        let reloaded = Manifest::load_or_create(&dir.path().join("manifest.txt")).unwrap();
        assert_eq!(reloaded.sstable_count(), 1);
        let survivor = &reloaded.sstables_oldest_to_newest()[0];
        assert!(dir.path().join("sst").join(survivor).exists());
    }
}
