//! Binary page codec.
//!
//! Fixed-size page layout: `[header: 32][payload][zero padding]`.
//!
//! Header (big-endian):
//!
//! ```text
//! [magic: i32][version: i32][flags: i32][key_count: i32][reserved: 16 bytes]
//! ```
//!
//! `flags` bit 0 set means leaf. Leaf payload repeats
//! `[k_len: i32][key][v_len: i32][value]` per key; internal payload is
//! `[child0: i32]` followed by `[k_len: i32][key][child(i+1): i32]` per key,
//! except that a zero-key internal page has an empty payload. This module
//! is the only place flag bits become [`Node`] variants.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

use crate::error::{BtreeError, Result};
use crate::page::{InternalNode, LeafNode, Node, Page};

/// Page header magic.
pub const PAGE_MAGIC: i32 = 0xDEAD_BEEFu32 as i32;
/// Only format version in existence.
pub const PAGE_VERSION: i32 = 1;
/// Fixed header size in bytes.
pub const HEADER_BYTES: usize = 32;

const RESERVED_BYTES: usize = HEADER_BYTES - 16;
const FLAG_LEAF: i32 = 1;

const MAX_KEY_LEN: i32 = 10_000_000;
const MAX_VAL_LEN: i32 = 100_000_000;

/// Encodes `page` into exactly `page_size` bytes, zero-padded.
///
/// Fails with [`BtreeError::PageOverflow`] when header plus payload would
/// exceed the page. This is what bounds the values a tiny-fanout tree can
/// store; the splitter's key cap keeps ordinary pages well below it.
pub fn encode(page: &Page, page_size: usize) -> Result<Vec<u8>> {
    if page_size < HEADER_BYTES {
        return Err(BtreeError::InvalidInput(format!(
            "page_size {page_size} smaller than header"
        )));
    }

    let mut buf = Vec::with_capacity(page_size);
    let (flags, key_count) = match &page.node {
        Node::Leaf(leaf) => (FLAG_LEAF, leaf.keys.len()),
        Node::Internal(internal) => (0, internal.keys.len()),
    };

    buf.extend_from_slice(&PAGE_MAGIC.to_be_bytes());
    buf.extend_from_slice(&PAGE_VERSION.to_be_bytes());
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&(key_count as i32).to_be_bytes());
    buf.extend_from_slice(&[0u8; RESERVED_BYTES]);

    match &page.node {
        Node::Leaf(leaf) => {
            if leaf.values.len() != leaf.keys.len() {
                return Err(BtreeError::Corrupt(format!(
                    "leaf {}: {} keys but {} values",
                    page.id,
                    leaf.keys.len(),
                    leaf.values.len()
                )));
            }
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                buf.extend_from_slice(&(key.len() as i32).to_be_bytes());
                buf.extend_from_slice(key);
                buf.extend_from_slice(&(value.len() as i32).to_be_bytes());
                buf.extend_from_slice(value);
            }
        }
        Node::Internal(internal) => {
            if key_count > 0 {
                if internal.children.len() != key_count + 1 {
                    return Err(BtreeError::Corrupt(format!(
                        "internal {}: {} keys but {} children",
                        page.id,
                        key_count,
                        internal.children.len()
                    )));
                }
                buf.extend_from_slice(&(internal.children[0] as i32).to_be_bytes());
                for (key, child) in internal.keys.iter().zip(&internal.children[1..]) {
                    buf.extend_from_slice(&(key.len() as i32).to_be_bytes());
                    buf.extend_from_slice(key);
                    buf.extend_from_slice(&(*child as i32).to_be_bytes());
                }
            }
        }
    }

    if buf.len() > page_size {
        return Err(BtreeError::PageOverflow(page_size));
    }
    buf.resize(page_size, 0);
    Ok(buf)
}

/// Decodes a full page image back into a [`Page`] with the given id.
pub fn decode(id: u32, bytes: &[u8]) -> Result<Page> {
    if bytes.len() < HEADER_BYTES {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: {} bytes is smaller than the header",
            bytes.len()
        )));
    }

    let mut rdr = bytes;
    let magic = rdr.read_i32::<BigEndian>()?;
    if magic != PAGE_MAGIC {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: bad magic {magic:#x}"
        )));
    }
    let version = rdr.read_i32::<BigEndian>()?;
    if version != PAGE_VERSION {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: unsupported version {version}"
        )));
    }
    let flags = rdr.read_i32::<BigEndian>()?;
    let is_leaf = flags & FLAG_LEAF != 0;
    let key_count = rdr.read_i32::<BigEndian>()?;
    if key_count < 0 {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: bad key_count {key_count}"
        )));
    }
    let mut reserved = [0u8; RESERVED_BYTES];
    rdr.read_exact(&mut reserved)
        .map_err(|_| truncated(id, "header"))?;

    if is_leaf {
        let mut leaf = LeafNode::default();
        for _ in 0..key_count {
            let key = read_sized(&mut rdr, id, "key", MAX_KEY_LEN, 1)?;
            let value = read_sized(&mut rdr, id, "value", MAX_VAL_LEN, 0)?;
            leaf.keys.push(key);
            leaf.values.push(value);
        }
        return Ok(Page {
            id,
            node: Node::Leaf(leaf),
        });
    }

    let mut internal = InternalNode::default();
    if key_count == 0 {
        // degenerate but representable: an internal page with no routing yet
        return Ok(Page {
            id,
            node: Node::Internal(internal),
        });
    }

    internal
        .children
        .push(read_child(&mut rdr, id)?);
    for _ in 0..key_count {
        let key = read_sized(&mut rdr, id, "key", MAX_KEY_LEN, 1)?;
        let child = read_child(&mut rdr, id)?;
        internal.keys.push(key);
        internal.children.push(child);
    }
    // children == keys + 1 holds by construction of the loop above
    Ok(Page {
        id,
        node: Node::Internal(internal),
    })
}

fn read_sized(rdr: &mut &[u8], id: u32, what: &str, max: i32, min: i32) -> Result<Vec<u8>> {
    let len = rdr
        .read_i32::<BigEndian>()
        .map_err(|_| truncated(id, what))?;
    if len < min || len > max {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: bad {what} length {len}"
        )));
    }
    let mut out = vec![0u8; len as usize];
    rdr.read_exact(&mut out).map_err(|_| truncated(id, what))?;
    Ok(out)
}

fn read_child(rdr: &mut &[u8], id: u32) -> Result<u32> {
    let child = rdr
        .read_i32::<BigEndian>()
        .map_err(|_| truncated(id, "child pointer"))?;
    if child < 0 {
        return Err(BtreeError::Corrupt(format!(
            "page {id}: bad child pointer {child}"
        )));
    }
    Ok(child as u32)
}

fn truncated(id: u32, what: &str) -> BtreeError {
    BtreeError::Corrupt(format!("page {id}: truncated {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn leaf_round_trip() {
        let mut page = Page::leaf(7);
        if let Node::Leaf(leaf) = &mut page.node {
            leaf.insert(b"alpha", b"1");
            leaf.insert(b"beta", b"");
            leaf.insert(b"gamma", &[0xDE, 0xAD]);
        }

        let bytes = encode(&page, PAGE_SIZE).unwrap();
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert_eq!(decode(7, &bytes).unwrap(), page);
    }

    #[test]
    fn internal_round_trip() {
        let page = Page {
            id: 3,
            node: Node::Internal(InternalNode {
                keys: vec![b"g".to_vec(), b"p".to_vec()],
                children: vec![1, 2, 4],
            }),
        };

        let bytes = encode(&page, PAGE_SIZE).unwrap();
        assert_eq!(decode(3, &bytes).unwrap(), page);
    }

    #[test]
    fn empty_leaf_and_empty_internal_round_trip() {
        let leaf = Page::leaf(0);
        let bytes = encode(&leaf, PAGE_SIZE).unwrap();
        assert_eq!(decode(0, &bytes).unwrap(), leaf);

        let internal = Page::internal(9);
        let bytes = encode(&internal, PAGE_SIZE).unwrap();
        assert_eq!(decode(9, &bytes).unwrap(), internal);
    }

    #[test]
    fn oversized_payload_is_page_overflow() {
        let mut page = Page::leaf(1);
        if let Node::Leaf(leaf) = &mut page.node {
            leaf.insert(b"k", &vec![0u8; PAGE_SIZE]);
        }
        assert!(matches!(
            encode(&page, PAGE_SIZE),
            Err(BtreeError::PageOverflow(_))
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let page = Page::leaf(0);
        let mut bytes = encode(&page, PAGE_SIZE).unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(decode(0, &bytes), Err(BtreeError::Corrupt(_))));
    }

    #[test]
    fn bad_version_is_corruption() {
        let page = Page::leaf(0);
        let mut bytes = encode(&page, PAGE_SIZE).unwrap();
        bytes[7] = 2; // version field
        assert!(matches!(decode(0, &bytes), Err(BtreeError::Corrupt(_))));
    }

    #[test]
    fn mismatched_leaf_vectors_refuse_to_encode() {
        let page = Page {
            id: 0,
            node: Node::Leaf(LeafNode {
                keys: vec![b"a".to_vec()],
                values: vec![],
            }),
        };
        assert!(matches!(
            encode(&page, PAGE_SIZE),
            Err(BtreeError::Corrupt(_))
        ));
    }

    #[test]
    fn broken_child_invariant_refuses_to_encode() {
        let page = Page {
            id: 0,
            node: Node::Internal(InternalNode {
                keys: vec![b"a".to_vec()],
                children: vec![1], // needs 2
            }),
        };
        assert!(matches!(
            encode(&page, PAGE_SIZE),
            Err(BtreeError::Corrupt(_))
        ));
    }

    #[test]
    fn zero_key_length_in_leaf_is_corruption() {
        let mut page = Page::leaf(0);
        if let Node::Leaf(leaf) = &mut page.node {
            leaf.insert(b"a", b"v");
        }
        let mut bytes = encode(&page, PAGE_SIZE).unwrap();
        // zero out the first record's key length
        bytes[HEADER_BYTES..HEADER_BYTES + 4].copy_from_slice(&0i32.to_be_bytes());
        assert!(matches!(decode(0, &bytes), Err(BtreeError::Corrupt(_))));
    }

    #[test]
    fn page_size_below_header_is_rejected() {
        let page = Page::leaf(0);
        assert!(matches!(
            encode(&page, HEADER_BYTES - 1),
            Err(BtreeError::InvalidInput(_))
        ));
    }
}
