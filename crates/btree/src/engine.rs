//! The B-Tree engine: descent, split propagation, and the commit batch.
//!
//! Commit protocol per `put`:
//!
//! 1. Stage every touched page image in a batch
//! 2. Append all of them to the WAL
//! 3. WAL fsync
//! 4. Write the pages in place
//! 5. Page file fsync
//! 6. Persist the meta atomically
//! 7. Reset the WAL
//!
//! A crash before step 3 loses nothing committed; a crash after it replays
//! the page images on the next open.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::codec;
use crate::error::{BtreeError, Result};
use crate::meta::Meta;
use crate::page::{InternalNode, LeafNode, Node, Page};
use crate::pagefile::PageFile;
use crate::wal::Wal;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct BtreeConfig {
    /// Page size for a freshly created database. Reopening an existing one
    /// uses the size recorded in its meta file.
    pub page_size: u32,
    /// Split a page once it holds this many keys. Deliberately tiny by
    /// default so splits show up after a handful of inserts.
    pub max_keys_per_page: usize,
    /// Keep the WAL after a successful commit instead of truncating it.
    /// Forces a replay on the next open; only useful in recovery tests.
    pub keep_wal: bool,
}

impl Default for BtreeConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_keys_per_page: 3,
            keep_wal: false,
        }
    }
}

/// A `(key, right page)` pair handed upward to the parent after a split.
struct Promotion {
    key: Vec<u8>,
    right: u32,
}

/// One staged page image awaiting commit.
struct PageWrite {
    id: u32,
    bytes: Vec<u8>,
}

/// A single-writer B-Tree engine.
///
/// `&mut self` on every operation is deliberate: exclusive access is the
/// engine's whole concurrency story, and the one long-lived page-file
/// handle needs it anyway.
pub struct BtreeEngine {
    config: BtreeConfig,
    meta: Meta,
    meta_path: PathBuf,
    page_file: PageFile,
    wal: Wal,
}

impl BtreeEngine {
    /// Opens (or creates) a database under `base_dir`: replays any pending
    /// WAL page images, then bootstraps the empty root leaf when the page
    /// file has never been written.
    pub fn open<P: Into<PathBuf>>(base_dir: P, config: BtreeConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;

        let meta_path = base_dir.join("meta.txt");
        let meta = Meta::load_or_create(&meta_path, config.page_size)?;
        let wal = Wal::open(base_dir.join("wal.log"))?;
        let mut page_file =
            PageFile::open(&base_dir.join("btree.data"), meta.page_size() as usize)?;

        let replayed = wal.replay_into(&mut page_file)?;
        let mut engine = Self {
            config,
            meta,
            meta_path,
            page_file,
            wal,
        };
        if replayed > 0 {
            engine.page_file.sync()?;
            engine.wal.reset()?;
            info!(replayed, "recovered page images from wal");
        }

        if !engine.page_file.has_page(0)? {
            engine.bootstrap_root()?;
        }

        info!(
            base_dir = %base_dir.display(),
            root = engine.meta.root_page_id(),
            page_size = engine.meta.page_size(),
            "btree engine opened"
        );
        Ok(engine)
    }

    /// Writes the empty root leaf through the full commit protocol, so
    /// even database creation is redo-logged.
    fn bootstrap_root(&mut self) -> Result<()> {
        let root = Page::leaf(0);
        let bytes = codec::encode(&root, self.page_size())?;

        self.wal.append_page(0, &bytes)?;
        self.wal.sync()?;
        self.page_file.write_page(0, &bytes)?;
        self.page_file.sync()?;
        self.meta.set_root_page_id(0);
        self.meta.persist_atomically(&self.meta_path)?;
        self.wal.reset()?;

        debug!("initialized empty root leaf");
        Ok(())
    }

    /// Looks up `key` by descending from the root.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Self::check_key(key)?;

        let mut page_id = self.meta.root_page_id();
        loop {
            let page = self.load_page(page_id)?;
            match page.node {
                Node::Leaf(leaf) => return Ok(leaf.find(key).map(<[u8]>::to_vec)),
                Node::Internal(internal) => {
                    let idx = internal.child_index_for(key);
                    page_id = internal.children[idx];
                }
            }
        }
    }

    /// Inserts or overwrites `key`, splitting on the way back up as
    /// needed, then commits the whole batch with one WAL fsync and one
    /// page-file fsync.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::check_key(key)?;

        let max_keys = self.config.max_keys_per_page;
        let mut path: Vec<(u32, usize)> = Vec::new();
        let mut batch: Vec<PageWrite> = Vec::new();

        // descend, remembering which child slot was taken at each level
        let mut page_id = self.meta.root_page_id();
        let mut leaf = loop {
            let page = self.load_page(page_id)?;
            match page.node {
                Node::Leaf(leaf) => break leaf,
                Node::Internal(internal) => {
                    let idx = internal.child_index_for(key);
                    path.push((page_id, idx));
                    page_id = internal.children[idx];
                }
            }
        };

        leaf.insert(key, value);
        let leaf_page = Page {
            id: page_id,
            node: Node::Leaf(leaf),
        };
        self.stage(&mut batch, &leaf_page)?;

        let mut promo = if leaf_page.is_full(max_keys) {
            Some(self.split_leaf(leaf_page, &mut batch)?)
        } else {
            None
        };

        // hand each promotion to the parent recorded on the way down
        while let Some(p) = promo.take() {
            let Some((parent_id, child_idx)) = path.pop() else {
                promo = Some(p);
                break;
            };
            let parent = self.load_page(parent_id)?;
            let Node::Internal(mut internal) = parent.node else {
                return Err(BtreeError::Corrupt(format!(
                    "page {parent_id} on the descent path is not internal"
                )));
            };
            internal.keys.insert(child_idx, p.key);
            internal.children.insert(child_idx + 1, p.right);

            let parent = Page {
                id: parent_id,
                node: Node::Internal(internal),
            };
            self.stage(&mut batch, &parent)?;

            if parent.is_full(max_keys) {
                promo = Some(self.split_internal(parent, &mut batch)?);
            }
        }

        // a promotion that outlives the path stack grows the tree a level
        if let Some(p) = promo {
            let new_root_id = self.meta.alloc_page_id();
            let new_root = Page {
                id: new_root_id,
                node: Node::Internal(InternalNode {
                    keys: vec![p.key],
                    children: vec![self.meta.root_page_id(), p.right],
                }),
            };
            self.meta.set_root_page_id(new_root_id);
            debug!(new_root = new_root_id, "root split");
            self.stage(&mut batch, &new_root)?;
        }

        self.commit(&batch)
    }

    /// Deletes are not supported by this engine; rebalancing on underflow
    /// was never designed.
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(BtreeError::Unsupported("delete"))
    }

    fn commit(&mut self, batch: &[PageWrite]) -> Result<()> {
        for write in batch {
            self.wal.append_page(write.id, &write.bytes)?;
        }
        self.wal.sync()?;

        for write in batch {
            self.page_file.write_page(write.id, &write.bytes)?;
        }
        self.page_file.sync()?;

        self.meta.persist_atomically(&self.meta_path)?;
        if !self.config.keep_wal {
            self.wal.reset()?;
        }
        Ok(())
    }

    /// Splits a leaf at the midpoint: the right half moves to a new page
    /// and the right page's first key is promoted.
    fn split_leaf(&mut self, page: Page, batch: &mut Vec<PageWrite>) -> Result<Promotion> {
        let Node::Leaf(mut leaf) = page.node else {
            return Err(BtreeError::Corrupt(format!(
                "split_leaf on non-leaf page {}",
                page.id
            )));
        };

        let mid = leaf.keys.len() / 2;
        let right_id = self.meta.alloc_page_id();
        let right = LeafNode {
            keys: leaf.keys.split_off(mid),
            values: leaf.values.split_off(mid),
        };
        let promo_key = right.keys[0].clone();

        let left = Page {
            id: page.id,
            node: Node::Leaf(leaf),
        };
        let right = Page {
            id: right_id,
            node: Node::Leaf(right),
        };
        self.stage(batch, &left)?;
        self.stage(batch, &right)?;

        debug!(left = left.id, right = right_id, "leaf split");
        Ok(Promotion {
            key: promo_key,
            right: right_id,
        })
    }

    /// Splits an internal page at the midpoint: the key at `mid` moves up,
    /// keys after it and children after slot `mid` move right.
    fn split_internal(&mut self, page: Page, batch: &mut Vec<PageWrite>) -> Result<Promotion> {
        let Node::Internal(mut internal) = page.node else {
            return Err(BtreeError::Corrupt(format!(
                "split_internal on non-internal page {}",
                page.id
            )));
        };

        let mid = internal.keys.len() / 2;
        let right_id = self.meta.alloc_page_id();

        let mut right_keys = internal.keys.split_off(mid);
        let promo_key = right_keys.remove(0); // the separator moves up, not right
        let right_children = internal.children.split_off(mid + 1);

        let left = Page {
            id: page.id,
            node: Node::Internal(internal),
        };
        let right = Page {
            id: right_id,
            node: Node::Internal(InternalNode {
                keys: right_keys,
                children: right_children,
            }),
        };
        self.stage(batch, &left)?;
        self.stage(batch, &right)?;

        debug!(left = left.id, right = right_id, "internal split");
        Ok(Promotion {
            key: promo_key,
            right: right_id,
        })
    }

    fn stage(&self, batch: &mut Vec<PageWrite>, page: &Page) -> Result<()> {
        batch.push(PageWrite {
            id: page.id,
            bytes: codec::encode(page, self.page_size())?,
        });
        Ok(())
    }

    fn load_page(&mut self, id: u32) -> Result<Page> {
        let bytes = self.page_file.read_page(id)?;
        codec::decode(id, &bytes)
    }

    fn page_size(&self) -> usize {
        self.meta.page_size() as usize
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(BtreeError::InvalidInput("key must not be empty".to_string()));
        }
        Ok(())
    }

    /// The current root page id; moves on every root split.
    pub fn root_page_id(&self) -> u32 {
        self.meta.root_page_id()
    }
}
