//! SSTable: immutable sorted table files.
//!
//! When the memtable crosses its byte threshold the engine flushes it to
//! disk as an SSTable; compaction produces them the same way. SSTables are
//! write-once, read-many: once renamed into place they are never modified,
//! only replaced wholesale by a compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted records)                        │
//! │   key_len (i32) | val_len (i32) | key | value?       │
//! │   val_len == -1  ⇒  tombstone, no value bytes        │
//! ├──────────────────────────────────────────────────────┤
//! │ INDEX SECTION (sparse, every Nth data record)        │
//! │   key_len (i32) | key | data_offset (i64)            │
//! ├──────────────────────────────────────────────────────┤
//! │ FOOTER (always the last 16 bytes)                    │
//! │   index_offset (i64) | index_count (i32) | magic     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. A lookup binary-searches the in-memory
//! sparse index for the greatest entry `<=` the target and scans forward
//! from that offset, so it touches at most one sparse period of records.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{FOOTER_BYTES, SSTABLE_MAGIC};
pub use reader::SstableReader;
pub use writer::SstableWriter;
