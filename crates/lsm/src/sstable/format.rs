//! SSTable binary format constants and footer read/write helpers.
//!
//! The footer is always the **last 16 bytes** of an SSTable file:
//!
//! ```text
//! [index_offset: i64 BE][index_count: i32 BE][magic: i32 BE]
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Write};

/// Magic number identifying SSTable files.
pub const SSTABLE_MAGIC: i32 = 0x5A7A_0B1E;

/// Size of the footer in bytes: 8 (`index_offset`) + 4 (`index_count`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 4 + 4;

/// Sentinel in a record's `val_len` field marking a tombstone.
pub const TOMBSTONE_LEN: i32 = -1;

/// Data-section records reject key lengths outside `(0, MAX_KEY_LEN]`.
pub const MAX_KEY_LEN: i32 = 10_000_000;

/// Data-section records reject value lengths outside `[-1, MAX_VAL_LEN]`.
pub const MAX_VAL_LEN: i32 = 100_000_000;

/// Index entries reject key lengths outside `(0, MAX_INDEX_KEY_LEN]`.
pub const MAX_INDEX_KEY_LEN: i32 = 1_000_000;

/// Writes the footer to `w`.
pub fn write_footer<W: Write>(w: &mut W, index_offset: u64, index_count: u32) -> IoResult<()> {
    w.write_i64::<BigEndian>(index_offset as i64)?;
    w.write_i32::<BigEndian>(index_count as i32)?;
    w.write_i32::<BigEndian>(SSTABLE_MAGIC)?;
    Ok(())
}

/// Reads the raw footer fields `(index_offset, index_count, magic)` from `r`.
/// The caller is expected to be positioned at the footer and to validate.
pub fn read_footer<R: Read>(r: &mut R) -> IoResult<(i64, i32, i32)> {
    let index_offset = r.read_i64::<BigEndian>()?;
    let index_count = r.read_i32::<BigEndian>()?;
    let magic = r.read_i32::<BigEndian>()?;
    Ok((index_offset, index_count, magic))
}
