// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Lazy forward/backward cursor over a B-tree snapshot (spec §4.2:
//! "produces a lazy, forward/backward sequence of (key,value) pairs
//! from a snapshot of the current revision; restartable by
//! re-seeking").

use crate::btree::node::{Item, Node};
use crate::block::BlockNo;
use crate::error::Result;

/// One level of the descent from root to the current leaf position.
struct Frame {
    block_no: BlockNo,
    node: Node,
    index: usize,
}

/// A read-only walk over a tree snapshot. Holds no lock beyond the
/// block reads it performs; safe to keep across calls because blocks
/// are never mutated once written (copy-on-write).
pub struct Cursor<'a, R> {
    reader: &'a R,
    stack: Vec<Frame>,
    exhausted_forward: bool,
}

/// Minimal capability a cursor needs from its owning tree: read a
/// node by block number. Kept as a plain closure-like trait rather
/// than depending on the full `Btree` type so cursors can also be
/// built in tests against a bare block map.
pub trait NodeSource {
    fn read_node(&self, block_no: BlockNo) -> Result<Node>;

    /// Resolves an item's value to its full bytes, following the
    /// overflow chain if the value spilled out of its node.
    fn resolve_value(&self, item: &Item) -> Result<Vec<u8>>;
}

impl<'a, R: NodeSource> Cursor<'a, R> {
    pub(crate) fn new(reader: &'a R) -> Self {
        Self {
            reader,
            stack: Vec::new(),
            exhausted_forward: false,
        }
    }

    /// Positions the cursor at the first entry whose key is ≥ `key`
    /// (or at end if none). Passing an empty slice seeks to the very
    /// first entry.
    pub fn seek(&mut self, root: BlockNo, key: &[u8]) -> Result<()> {
        self.stack.clear();
        self.exhausted_forward = false;
        self.descend(root, key)?;

        // If the target fell past the last entry of the leaf we
        // landed on, the first entry ≥ target actually lives in the
        // next leaf; roll forward onto it so `current` doesn't
        // falsely report "no entry" when one exists.
        if let Some(frame) = self.stack.last() {
            if frame.index >= frame.node.items.len() {
                self.exhausted_forward = false;
                self.advance_past_leaf()?;
            }
        }
        Ok(())
    }

    fn descend(&mut self, mut block_no: BlockNo, key: &[u8]) -> Result<()> {
        loop {
            let node = self.reader.read_node(block_no)?;

            if node.is_leaf() {
                let index = match node.search(key) {
                    Ok(idx) => idx,
                    Err(idx) => idx,
                };
                self.stack.push(Frame { block_no, node, index });
                return Ok(());
            }

            let child_index = node.child_index_for(key);
            let child_block = node.items[child_index].child_block()?;
            self.stack.push(Frame {
                block_no,
                node,
                index: child_index,
            });
            block_no = child_block;
        }
    }

    /// Current `(key, value_bytes)` pair, or `None` past the end.
    pub fn current(&self) -> Option<(&[u8], &crate::btree::node::ItemValue)> {
        let frame = self.stack.last()?;
        frame
            .node
            .items
            .get(frame.index)
            .map(|item| (item.key.as_slice(), &item.value))
    }

    /// Current `(key, resolved value bytes)` pair, following the
    /// overflow chain if needed.
    pub fn current_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(frame) = self.stack.last() else {
            return Ok(None);
        };
        let Some(item) = frame.node.items.get(frame.index) else {
            return Ok(None);
        };
        Ok(Some((item.key.clone(), self.reader.resolve_value(item)?)))
    }

    /// Advances to the next entry in key order.
    pub fn next(&mut self) -> Result<bool> {
        if self.exhausted_forward {
            return Ok(false);
        }

        if let Some(frame) = self.stack.last_mut() {
            if frame.index + 1 < frame.node.items.len() {
                frame.index += 1;
                return Ok(true);
            }
        }

        self.advance_past_leaf()
    }

    /// Pops the (exhausted or past-end) current leaf and descends
    /// into the leftmost leaf of the next sibling subtree, if any.
    fn advance_past_leaf(&mut self) -> Result<bool> {
        self.stack.pop();
        while let Some(parent) = self.stack.last_mut() {
            if parent.index + 1 < parent.node.items.len() {
                parent.index += 1;
                let next_child = parent.node.items[parent.index].child_block()?;
                self.descend_leftmost(next_child)?;
                return Ok(true);
            }
            self.stack.pop();
        }

        self.exhausted_forward = true;
        Ok(false)
    }

    fn descend_leftmost(&mut self, mut block_no: BlockNo) -> Result<()> {
        loop {
            let node = self.reader.read_node(block_no)?;
            if node.is_leaf() {
                self.stack.push(Frame { block_no, node, index: 0 });
                return Ok(());
            }
            let child_block = node.items[0].child_block()?;
            self.stack.push(Frame { block_no, node, index: 0 });
            block_no = child_block;
        }
    }
}
