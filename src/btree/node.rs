// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! B-tree node layout (spec §6: "fixed-size block B. First 4 bytes:
//! revision. Next 2 bytes: level/flags. Next 2 bytes: item count.
//! Remainder: sorted items, each prefixed with byte-length of key and
//! value. Overflow chains use the last 4 bytes as a next-block
//! pointer.").
//!
//! Leaf items hold either the value inline, or an overflow pointer
//! plus total length when the value is too large to fit in one block.
//! Internal items hold a four-byte child block number as their value.

use crate::block::BlockNo;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

const HEADER_LEN: usize = 4 + 2 + 2;
const OVERFLOW_TRAILER_LEN: usize = 4;
const FLAG_LEAF: u16 = 0x8000;

/// One key/value pair stored in a node, plus bookkeeping for values
/// that spilled into overflow blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub value: ItemValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemValue {
    /// Value bytes stored directly in the node (leaves) or a 4-byte
    /// big-endian child block number (internal nodes).
    Inline(Vec<u8>),
    /// Value too large for one block: `first_block` begins a chain of
    /// overflow blocks (each containing a data portion plus a 4-byte
    /// next-pointer trailer, `0` meaning end of chain) holding
    /// `total_len` bytes overall.
    Overflow { first_block: BlockNo, total_len: u32 },
}

impl Item {
    pub fn leaf(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value: ItemValue::Inline(value),
        }
    }

    pub fn internal(key: Vec<u8>, child: BlockNo) -> Self {
        Self {
            key,
            value: ItemValue::Inline(child.to_be_bytes().to_vec()),
        }
    }

    /// Interprets this item's value as a child block number (internal
    /// nodes only).
    pub fn child_block(&self) -> Result<BlockNo> {
        match &self.value {
            ItemValue::Inline(bytes) if bytes.len() == 4 => {
                Ok(BigEndian::read_u32(bytes))
            }
            _ => Err(Error::DatabaseCorrupt {
                table: "btree-node",
                detail: "internal item value is not a 4-byte child pointer".into(),
            }),
        }
    }
}

/// A decoded node: either a leaf (level 0) holding data items, or an
/// internal node (level ≥ 1) holding separator-key/child-pointer
/// pairs.
#[derive(Clone, Debug)]
pub struct Node {
    pub revision: u64,
    pub level: u16,
    pub items: Vec<Item>,
}

impl Node {
    pub fn new_leaf(revision: u64) -> Self {
        Self {
            revision,
            level: 0,
            items: Vec::new(),
        }
    }

    pub fn new_internal(revision: u64, level: u16) -> Self {
        Self {
            revision,
            level,
            items: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Binary-searches for `key`, returning `Ok(idx)` on an exact
    /// match or `Err(idx)` for the insertion point.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.items.binary_search_by(|item| item.key.as_slice().cmp(key))
    }

    /// Encodes this node as a block payload of exactly `block_size`
    /// bytes, spilling items that do not fit... actually encoding
    /// assumes the caller has already ensured the node fits (callers
    /// split nodes that grow past capacity before encoding).
    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(block_size);
        buf.extend_from_slice(&(self.revision as u32).to_be_bytes());

        let mut level_flags = self.level;
        if self.is_leaf() {
            level_flags |= FLAG_LEAF;
        }
        buf.extend_from_slice(&level_flags.to_be_bytes());
        buf.extend_from_slice(&(self.items.len() as u16).to_be_bytes());

        for item in &self.items {
            if item.key.len() > 255 {
                return Err(Error::InvalidArgument("key longer than 255 bytes".into()));
            }
            buf.push(item.key.len() as u8);
            match &item.value {
                ItemValue::Inline(bytes) => {
                    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    buf.push(0); // overflow flag: inline
                    buf.extend_from_slice(&item.key);
                    buf.extend_from_slice(bytes);
                }
                ItemValue::Overflow { first_block, total_len } => {
                    buf.extend_from_slice(&total_len.to_be_bytes());
                    buf.push(1); // overflow flag: chained
                    buf.extend_from_slice(&item.key);
                    buf.extend_from_slice(&first_block.to_be_bytes());
                }
            }
        }

        if buf.len() > block_size - OVERFLOW_TRAILER_LEN {
            return Err(Error::InvalidOperation(format!(
                "node of {} bytes does not fit in a {}-byte block",
                buf.len(),
                block_size
            )));
        }
        buf.resize(block_size, 0);
        Ok(buf)
    }

    /// Decodes a node from a block payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::DatabaseCorrupt {
                table: "btree-node",
                detail: "block shorter than node header".into(),
            });
        }

        let revision = u64::from(BigEndian::read_u32(&bytes[0..4]));
        let level_flags = BigEndian::read_u16(&bytes[4..6]);
        let level = level_flags & !FLAG_LEAF;
        let item_count = BigEndian::read_u16(&bytes[6..8]) as usize;

        let mut pos = HEADER_LEN;
        let mut items = Vec::with_capacity(item_count);
        for _ in 0..item_count {
            if pos + 1 + 4 + 1 > bytes.len() {
                return Err(Error::DatabaseCorrupt {
                    table: "btree-node",
                    detail: "truncated item header".into(),
                });
            }
            let key_len = bytes[pos] as usize;
            pos += 1;
            let value_len = BigEndian::read_u32(&bytes[pos..pos + 4]) as usize;
            pos += 4;
            let is_overflow = bytes[pos] != 0;
            pos += 1;

            if pos + key_len > bytes.len() {
                return Err(Error::DatabaseCorrupt {
                    table: "btree-node",
                    detail: "truncated item key".into(),
                });
            }
            let key = bytes[pos..pos + key_len].to_vec();
            pos += key_len;

            let value = if is_overflow {
                if pos + 4 > bytes.len() {
                    return Err(Error::DatabaseCorrupt {
                        table: "btree-node",
                        detail: "truncated overflow pointer".into(),
                    });
                }
                let first_block = BigEndian::read_u32(&bytes[pos..pos + 4]);
                pos += 4;
                ItemValue::Overflow {
                    first_block,
                    total_len: value_len as u32,
                }
            } else {
                if pos + value_len > bytes.len() {
                    return Err(Error::DatabaseCorrupt {
                        table: "btree-node",
                        detail: "truncated inline value".into(),
                    });
                }
                let value = bytes[pos..pos + value_len].to_vec();
                pos += value_len;
                ItemValue::Inline(value)
            };

            items.push(Item { key, value });
        }

        Ok(Self { revision, level, items })
    }

    /// For an internal node, finds the index of the child that may
    /// contain `key`: the last item whose key is ≤ `key` (internal
    /// nodes always keep their first item's key as the empty string,
    /// so this never underflows).
    pub fn child_index_for(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => idx - 1,
        }
    }

    /// Estimated encoded size, used to decide whether an insert must
    /// split the node before it is written out.
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_LEN;
        for item in &self.items {
            len += 1 + 4 + 1 + item.key.len();
            len += match &item.value {
                ItemValue::Inline(bytes) => bytes.len(),
                ItemValue::Overflow { .. } => 4,
            };
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let mut node = Node::new_leaf(7);
        node.items.push(Item::leaf(b"cat".to_vec(), b"meow".to_vec()));
        node.items.push(Item::leaf(b"dog".to_vec(), b"woof".to_vec()));

        let encoded = node.encode(512).unwrap();
        let decoded = Node::decode(&encoded).unwrap();

        assert_eq!(decoded.revision, 7);
        assert!(decoded.is_leaf());
        assert_eq!(decoded.items, node.items);
    }

    #[test]
    fn internal_roundtrip() {
        let mut node = Node::new_internal(3, 1);
        node.items.push(Item::internal(b"m".to_vec(), 42));

        let encoded = node.encode(512).unwrap();
        let decoded = Node::decode(&encoded).unwrap();

        assert!(!decoded.is_leaf());
        assert_eq!(decoded.items[0].child_block().unwrap(), 42);
    }

    #[test]
    fn overflow_value_roundtrip() {
        let mut node = Node::new_leaf(1);
        node.items.push(Item {
            key: b"big".to_vec(),
            value: ItemValue::Overflow {
                first_block: 99,
                total_len: 10_000,
            },
        });

        let encoded = node.encode(512).unwrap();
        let decoded = Node::decode(&encoded).unwrap();
        assert_eq!(decoded.items[0].value, node.items[0].value);
    }

    #[test]
    fn search_finds_exact_and_insertion_point() {
        let mut node = Node::new_leaf(0);
        node.items.push(Item::leaf(b"a".to_vec(), vec![]));
        node.items.push(Item::leaf(b"c".to_vec(), vec![]));

        assert_eq!(node.search(b"a"), Ok(0));
        assert_eq!(node.search(b"b"), Err(1));
        assert_eq!(node.search(b"z"), Err(2));
    }

    #[test]
    fn oversized_node_refuses_to_encode() {
        let mut node = Node::new_leaf(0);
        node.items.push(Item::leaf(vec![0u8; 100], vec![0u8; 500]));
        assert!(node.encode(256).is_err());
    }
}
