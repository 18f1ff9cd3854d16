//! The manifest names the live SSTables.
//!
//! A plain text file, one directive per line:
//!
//! ```text
//! nextSstId=7
//! sst=sst-000003.dat
//! sst=sst-000006.dat
//! ```
//!
//! `sst=` lines appear in creation order, so the list is oldest-first and
//! its reverse is the read path's newest-first order. The file is rewritten
//! to a sibling `.tmp` and atomically renamed over the canonical path on
//! every persist; readers see either the old or the new manifest, never a
//! partial one.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Manifest {
    next_sst_id: u64,
    sstables: Vec<String>,
}

impl Manifest {
    /// Loads an existing manifest, or creates (and persists) a fresh one
    /// with `nextSstId=1` and no tables.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let manifest = Self {
                next_sst_id: 1,
                sstables: Vec::new(),
            };
            manifest.persist_atomically(path)?;
            return Ok(manifest);
        }

        let mut manifest = Self {
            next_sst_id: 1,
            sstables: Vec::new(),
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("read manifest {}", path.display()))?;
        for line in text.lines() {
            if let Some(id) = line.strip_prefix("nextSstId=") {
                manifest.next_sst_id = id
                    .parse()
                    .with_context(|| format!("bad manifest line: {line}"))?;
            } else if let Some(name) = line.strip_prefix("sst=") {
                manifest.sstables.push(name.to_string());
            }
        }
        Ok(manifest)
    }

    /// Allocates the next SSTable id (post-increment).
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_sst_id;
        self.next_sst_id += 1;
        id
    }

    /// Appends a freshly flushed table; it becomes the newest.
    pub fn add_sstable(&mut self, name: String) {
        self.sstables.push(name);
    }

    /// Replaces every live table with the single compaction output.
    pub fn replace_all_with(&mut self, name: String) {
        self.sstables.clear();
        self.sstables.push(name);
    }

    /// Table names in creation order, oldest first.
    pub fn sstables_oldest_to_newest(&self) -> &[String] {
        &self.sstables
    }

    /// Table paths in read order, newest first.
    pub fn sstables_newest_first(&self, sst_dir: &Path) -> Vec<PathBuf> {
        self.sstables
            .iter()
            .rev()
            .map(|name| sst_dir.join(name))
            .collect()
    }

    pub fn sstable_count(&self) -> usize {
        self.sstables.len()
    }

    /// Writes the manifest to `<path>.tmp`, fsyncs, and atomically renames
    /// it over `path`.
    pub fn persist_atomically(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("txt.tmp");

        let mut contents = format!("nextSstId={}\n", self.next_sst_id);
        for name in &self.sstables {
            contents.push_str("sst=");
            contents.push_str(name);
            contents.push('\n');
        }

        let mut file =
            File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
        Ok(())
    }
}
