//! The LSM engine: write path, read path, flush, and compaction trigger.
//!
//! Every mutation is made durable in the WAL before it touches the
//! memtable, so a crash at any point replays into the same state on the
//! next open. The WAL is truncated only after its contents are durably
//! reflected in an SSTable and the manifest; the flush is the checkpoint.

use anyhow::{ensure, Result};
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::compaction;
use crate::manifest::Manifest;
use crate::memtable::{Memtable, ValueRecord};
use crate::sstable::{SstableReader, SstableWriter};
use crate::wal::Wal;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Flush the memtable once its byte estimate reaches this threshold.
    pub mem_flush_bytes: u64,
    /// Run a full compaction once this many SSTables are live.
    pub compact_trigger: usize,
    /// Sparse index period for flushed and compacted tables.
    pub sparse_every: usize,
    /// Keep the WAL after a successful checkpoint instead of truncating it.
    /// Forces a replay on the next open; only useful in recovery tests.
    pub keep_wal: bool,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            mem_flush_bytes: 4 * 1024 * 1024,
            compact_trigger: 4,
            sparse_every: 4,
            keep_wal: false,
        }
    }
}

/// A single-writer log-structured merge engine.
///
/// `&mut self` on every operation is deliberate: exclusive access is the
/// engine's whole concurrency story. Callers that share an engine across
/// threads wrap it in a `Mutex` and get the same serialization.
pub struct LsmEngine {
    data_dir: PathBuf,
    config: LsmConfig,
    wal: Wal,
    mem: Memtable,
    manifest: Manifest,
    compaction_running: bool,
}

impl LsmEngine {
    /// Opens (or creates) a database under `data_dir`, replaying any
    /// pending WAL records into the memtable.
    pub fn open<P: Into<PathBuf>>(data_dir: P, config: LsmConfig) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join("sst"))?;

        let manifest = Manifest::load_or_create(&data_dir.join("manifest.txt"))?;
        let wal = Wal::open(data_dir.join("wal.log"))?;
        let mut mem = Memtable::new();

        let replayed = wal.replay_into(&mut mem)?;
        info!(
            data_dir = %data_dir.display(),
            replayed,
            mem_bytes = mem.approx_bytes(),
            mem_keys = mem.len(),
            sstables = manifest.sstable_count(),
            "lsm engine opened"
        );

        let mut engine = Self {
            data_dir,
            config,
            wal,
            mem,
            manifest,
            compaction_running: false,
        };
        // A previous run may have crashed past the trigger.
        engine.maybe_compact()?;
        Ok(engine)
    }

    /// Durably stores `value` under `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        self.wal.append_put(key, value)?;
        self.mem.put(key.to_vec(), value.to_vec());
        self.roll_if_needed()
    }

    /// Durably deletes `key` by writing a tombstone.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        self.wal.append_delete(key)?;
        self.mem.delete(key.to_vec());
        self.roll_if_needed()
    }

    /// Looks up `key`: memtable first, then SSTables newest to oldest.
    /// The first layer that mentions the key at all decides the outcome,
    /// and a tombstone anywhere means absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ensure!(!key.is_empty(), "key must not be empty");

        if let Some(record) = self.mem.get(key) {
            return Ok(match record {
                ValueRecord::Present(v) => Some(v.clone()),
                ValueRecord::Tombstone => None,
            });
        }

        for path in self.manifest.sstables_newest_first(&self.sst_dir()) {
            let reader = SstableReader::open(&path)?;
            if let Some(record) = reader.get(key)? {
                return Ok(match record {
                    ValueRecord::Present(v) => Some(v),
                    ValueRecord::Tombstone => None,
                });
            }
        }

        Ok(None)
    }

    /// Flushes the memtable to a new SSTable and truncates the WAL.
    ///
    /// A crash between any two steps is tolerated: the WAL still holds
    /// every record, so the next open rebuilds the memtable and repeats
    /// the flush under a fresh id. A leftover `.tmp` is never referenced.
    pub fn flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            debug!("flush skipped: memtable empty");
            return Ok(());
        }

        let id = self.manifest.next_id();
        let name = format!("sst-{id:06}.dat");
        let out = self.sst_dir().join(&name);
        let tmp = self.sst_dir().join(format!("{name}.tmp"));

        let snapshot = self.mem.snapshot();
        let tombstones = snapshot.values().filter(|r| r.is_tombstone()).count();
        info!(
            out = %name,
            keys = snapshot.len(),
            tombstones,
            mem_bytes = self.mem.approx_bytes(),
            "flushing memtable"
        );

        SstableWriter::write(&tmp, &snapshot, self.config.sparse_every)?;
        fs::rename(&tmp, &out)?;

        self.manifest.add_sstable(name);
        self.manifest
            .persist_atomically(&self.data_dir.join("manifest.txt"))?;

        self.mem.clear();
        if !self.config.keep_wal {
            self.wal.reset()?;
        }
        debug!(sstables = self.manifest.sstable_count(), "flush complete");
        Ok(())
    }

    /// Runs a full compaction unconditionally (the trigger check lives in
    /// [`maybe_compact`](Self::maybe_compact)).
    pub fn compact_all(&mut self) -> Result<()> {
        if self.compaction_running {
            return Ok(());
        }
        self.compaction_running = true;
        let result =
            compaction::compact_all(&self.data_dir, &mut self.manifest, self.config.sparse_every);
        self.compaction_running = false;
        result
    }

    fn roll_if_needed(&mut self) -> Result<()> {
        let bytes = self.mem.approx_bytes() as u64;
        if bytes >= self.config.mem_flush_bytes {
            debug!(bytes, threshold = self.config.mem_flush_bytes, "flush triggered");
            self.flush()?;
            self.maybe_compact()?;
        }
        Ok(())
    }

    fn maybe_compact(&mut self) -> Result<()> {
        let count = self.manifest.sstable_count();
        if count < self.config.compact_trigger {
            debug!(count, trigger = self.config.compact_trigger, "compaction not due");
            return Ok(());
        }
        info!(count, trigger = self.config.compact_trigger, "compaction due");
        self.compact_all()
    }

    fn sst_dir(&self) -> PathBuf {
        self.data_dir.join("sst")
    }

    /// Number of live SSTables, handy for observing flush/compaction.
    pub fn sstable_count(&self) -> usize {
        self.manifest.sstable_count()
    }
}
