//! # StrataKV
//!
//! A uniform key→bytes interface over two independent storage engines:
//! the log-structured merge engine in the [`lsm`] crate and the page-based
//! B-Tree engine in the [`btree`] crate. One engine per database instance;
//! both speak the same three-method contract.
//!
//! ```no_run
//! use kv::{KvStore, LsmConfig, Store};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut db = Store::open_lsm("data/lsm", LsmConfig::default())?;
//! db.put(b"greeting", b"hello")?;
//! assert_eq!(db.get(b"greeting")?, Some(b"hello".to_vec()));
//! db.delete(b"greeting")?;
//! # Ok(())
//! # }
//! ```
//!
//! Keys are non-empty opaque byte strings ordered lexicographically;
//! values are arbitrary bytes (empty allowed). `delete` succeeds on the
//! LSM engine (a tombstone) and fails with "unsupported" on the B-Tree
//! engine, which never learned to rebalance.

use anyhow::Result;

pub use btree::{BtreeConfig, BtreeEngine};
pub use lsm::{LsmConfig, LsmEngine};

/// The key–value contract both engines implement.
///
/// Every method takes `&mut self`: operations are serialized by exclusive
/// access, which is the whole concurrency model. A successful `put` is
/// durable before it returns.
pub trait KvStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

impl KvStore for LsmEngine {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        LsmEngine::put(self, key, value)
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        LsmEngine::get(self, key)
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        LsmEngine::delete(self, key)
    }
}

impl KvStore for BtreeEngine {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(BtreeEngine::put(self, key, value)?)
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(BtreeEngine::get(self, key)?)
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        Ok(BtreeEngine::delete(self, key)?)
    }
}

/// A database instance backed by one of the two engines.
pub enum Store {
    Lsm(LsmEngine),
    Btree(BtreeEngine),
}

impl Store {
    /// Opens (or creates) an LSM-backed database under `data_dir`.
    pub fn open_lsm(data_dir: impl Into<std::path::PathBuf>, config: LsmConfig) -> Result<Self> {
        Ok(Store::Lsm(LsmEngine::open(data_dir, config)?))
    }

    /// Opens (or creates) a B-Tree-backed database under `data_dir`.
    pub fn open_btree(
        data_dir: impl Into<std::path::PathBuf>,
        config: BtreeConfig,
    ) -> Result<Self> {
        Ok(Store::Btree(BtreeEngine::open(data_dir, config)?))
    }
}

impl KvStore for Store {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self {
            Store::Lsm(engine) => engine.put(key, value),
            Store::Btree(engine) => KvStore::put(engine, key, value),
        }
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            Store::Lsm(engine) => engine.get(key),
            Store::Btree(engine) => KvStore::get(engine, key),
        }
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        match self {
            Store::Lsm(engine) => engine.delete(key),
            Store::Btree(engine) => KvStore::delete(engine, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn check_contract(db: &mut dyn KvStore) {
        db.put(b"k1", b"v1").unwrap();
        db.put(b"k2", b"v2").unwrap();
        assert_eq!(db.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);

        db.put(b"k1", b"v1b").unwrap();
        assert_eq!(db.get(b"k1").unwrap(), Some(b"v1b".to_vec()));

        db.put(b"empty", b"").unwrap();
        assert_eq!(db.get(b"empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn lsm_store_honors_the_contract() {
        let dir = tempdir().unwrap();
        let mut db = Store::open_lsm(dir.path(), LsmConfig::default()).unwrap();
        check_contract(&mut db);

        // deletes are supported here
        db.delete(b"k1").unwrap();
        assert_eq!(db.get(b"k1").unwrap(), None);
    }

    #[test]
    fn btree_store_honors_the_contract() {
        let dir = tempdir().unwrap();
        let mut db = Store::open_btree(dir.path(), BtreeConfig::default()).unwrap();
        check_contract(&mut db);

        // deletes are not, and the failed call changes nothing
        let err = db.delete(b"k1").unwrap_err();
        assert!(err.to_string().contains("unsupported"));
        assert_eq!(db.get(b"k1").unwrap(), Some(b"v1b".to_vec()));
    }

    #[test]
    fn both_stores_survive_a_restart() {
        let dir = tempdir().unwrap();
        let lsm_dir = dir.path().join("lsm");
        let btree_dir = dir.path().join("btree");

        {
            let mut db = Store::open_lsm(&lsm_dir, LsmConfig::default()).unwrap();
            db.put(b"engine", b"lsm").unwrap();
            let mut db = Store::open_btree(&btree_dir, BtreeConfig::default()).unwrap();
            db.put(b"engine", b"btree").unwrap();
        }

        let mut db = Store::open_lsm(&lsm_dir, LsmConfig::default()).unwrap();
        assert_eq!(db.get(b"engine").unwrap(), Some(b"lsm".to_vec()));
        let mut db = Store::open_btree(&btree_dir, BtreeConfig::default()).unwrap();
        assert_eq!(db.get(b"engine").unwrap(), Some(b"btree".to_vec()));
    }

    #[test]
    fn engines_keep_separate_data_dirs() {
        let dir = tempdir().unwrap();
        let mut lsm = Store::open_lsm(dir.path().join("a"), LsmConfig::default()).unwrap();
        let mut btree = Store::open_btree(dir.path().join("b"), BtreeConfig::default()).unwrap();

        lsm.put(b"k", b"from-lsm").unwrap();
        btree.put(b"k", b"from-btree").unwrap();

        assert_eq!(lsm.get(b"k").unwrap(), Some(b"from-lsm".to_vec()));
        assert_eq!(btree.get(b"k").unwrap(), Some(b"from-btree".to_vec()));
    }
}
