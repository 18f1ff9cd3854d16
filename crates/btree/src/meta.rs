//! The meta file: root pointer, page allocator state, format identity.
//!
//! A plain text file, one directive per line:
//!
//! ```text
//! rootPageId=0
//! nextPageId=1
//! pageSize=4096
//! version=1
//! magic=-1091584273
//! ```
//!
//! The magic is the signed decimal rendering of `0xBEEFBEEF`. Every
//! persist rewrites a sibling `.tmp` and atomically renames it over the
//! canonical path, so readers see either the old or the new meta, never a
//! torn one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{BtreeError, Result};

const META_MAGIC: i32 = 0xBEEF_BEEFu32 as i32;
const DEFAULT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Meta {
    root_page_id: u32,
    next_page_id: u32,
    page_size: u32,
    version: u32,
    magic: i32,
}

impl Meta {
    /// Loads an existing meta file, or creates (and persists) a fresh one:
    /// root at page 0, allocator at 1, the given page size.
    pub fn load_or_create(path: &Path, page_size: u32) -> Result<Self> {
        if !path.exists() {
            let meta = Self {
                root_page_id: 0, // page 0 is the root until the first root split
                next_page_id: 1,
                page_size,
                version: DEFAULT_VERSION,
                magic: META_MAGIC,
            };
            meta.persist_atomically(path)?;
            return Ok(meta);
        }

        let mut meta = Self {
            root_page_id: 0,
            next_page_id: 0,
            page_size: 0,
            version: 0,
            magic: 0,
        };
        let text = fs::read_to_string(path)?;
        for line in text.lines() {
            if let Some(v) = line.strip_prefix("rootPageId=") {
                meta.root_page_id = parse_u32(line, v)?;
            } else if let Some(v) = line.strip_prefix("nextPageId=") {
                meta.next_page_id = parse_u32(line, v)?;
            } else if let Some(v) = line.strip_prefix("pageSize=") {
                meta.page_size = parse_u32(line, v)?;
            } else if let Some(v) = line.strip_prefix("version=") {
                meta.version = parse_u32(line, v)?;
            } else if let Some(v) = line.strip_prefix("magic=") {
                meta.magic = v
                    .parse()
                    .map_err(|_| BtreeError::Corrupt(format!("bad meta line: {line}")))?;
            } else {
                return Err(BtreeError::Corrupt(format!("invalid meta line: {line}")));
            }
        }

        if meta.magic != META_MAGIC {
            return Err(BtreeError::Corrupt(format!(
                "bad meta magic: {}",
                meta.magic
            )));
        }
        if meta.page_size == 0 {
            return Err(BtreeError::Corrupt("meta missing pageSize".to_string()));
        }
        Ok(meta)
    }

    /// Allocates the next page id (post-increment). Pages are never freed.
    pub fn alloc_page_id(&mut self) -> u32 {
        let id = self.next_page_id;
        self.next_page_id += 1;
        id
    }

    pub fn root_page_id(&self) -> u32 {
        self.root_page_id
    }

    pub fn set_root_page_id(&mut self, id: u32) {
        self.root_page_id = id;
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Writes the meta to `<path>.tmp`, fsyncs, and atomically renames it
    /// over `path`.
    pub fn persist_atomically(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("txt.tmp");

        let contents = format!(
            "rootPageId={}\nnextPageId={}\npageSize={}\nversion={}\nmagic={}\n",
            self.root_page_id, self.next_page_id, self.page_size, self.version, self.magic
        );

        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn parse_u32(line: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| BtreeError::Corrupt(format!("bad meta line: {line}")))
}
