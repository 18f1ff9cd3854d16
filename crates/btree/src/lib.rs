//! # B-Tree engine
//!
//! A page-based B-Tree storage engine for the StrataKV store.
//!
//! Keys and values live in fixed-size pages inside a single data file,
//! indexed by page id. Every mutation is staged as a batch of full page
//! images, appended to a redo-only [`wal::Wal`] and fsynced **before** the
//! pages are written in place, so a crash at any point replays the WAL
//! into the page file on the next open. The WAL is truncated once the page
//! file and the [`meta::Meta`] are durable, which is the checkpoint.
//!
//! ## On-disk layout (under the data directory)
//!
//! ```text
//! btree.data   fixed-size pages at offset page_id * page_size
//! wal.log      redo log of full page images with per-record CRC-32
//! meta.txt     rootPageId / nextPageId / pageSize / version / magic
//! ```
//!
//! All multi-byte integers on disk are big-endian.

pub mod codec;
pub mod engine;
pub mod error;
pub mod meta;
pub mod page;
pub mod pagefile;
pub mod wal;

pub use engine::{BtreeConfig, BtreeEngine};
pub use error::{BtreeError, Result};
pub use page::{InternalNode, LeafNode, Node, Page};
