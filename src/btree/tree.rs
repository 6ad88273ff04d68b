// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The copy-on-write B-tree proper (spec §4.2): point lookup, insert,
//! delete, ordered cursor, and revisioned atomic commit, built on top
//! of [`crate::block::BlockStore`], [`super::node::Node`] and
//! [`super::base::BaseRecord`].
//!
//! Mutations are copy-on-write eagerly rather than batched at commit
//! time: every node touched by an `add`/`del` is immediately written
//! to a freshly allocated block, and the old block is released into
//! the free list. `commit` only has to publish the new root pointer
//! into the base file; `cancel` only has to forget the new root
//! pointer and revert to the last-published one. The cost is that
//! blocks written during a cancelled transaction are never reclaimed
//! by the free list (nothing ever records them as released) — for a
//! single-writer engine that always calls `commit` or restarts from a
//! fresh open, this is an acceptable amount of slack rather than a
//! correctness problem, and is cheaper than carrying a parallel
//! "dirty, not yet persisted" node map.

use crate::block::{BlockNo, BlockStore, NO_BLOCK};
use crate::btree::base::{BaseRecord, BaseSlot};
use crate::btree::cursor::{Cursor, NodeSource};
use crate::btree::node::{Item, ItemValue, Node};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::version::Version;
use byteorder::{BigEndian, ByteOrder};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const OVERFLOW_TRAILER_LEN: usize = 4;

/// A single table's copy-on-write B-tree.
pub struct Btree<F: FileSystem> {
    table_path: PathBuf,
    store: BlockStore,
    read_only: bool,

    active_slot: BaseSlot,
    committed_revision: u64,
    committed_root: BlockNo,
    committed_level: u16,
    committed_item_count: u64,

    root: BlockNo,
    level: u16,
    item_count: u64,

    _fs: PhantomData<F>,
}

impl<F: FileSystem> Btree<F> {
    /// Opens the table at `table_path` (without suffix; the block
    /// file is `<table_path>.DB`, the base files
    /// `<table_path>.baseA`/`.baseB`).
    pub fn open(
        table_path: impl AsRef<Path>,
        cache: Arc<crate::block::cache::BlockCache>,
        cache_tag: u8,
        config: &Config,
        read_only: bool,
    ) -> Result<Self> {
        let table_path = table_path.as_ref().to_path_buf();

        let (base, active_slot) = match BaseRecord::open_active::<F>(&table_path) {
            Ok(found) => found,
            Err(_) if !read_only => (
                BaseRecord {
                    version: Version::V1,
                    block_size: config.block_size,
                    root_block: NO_BLOCK,
                    level: 0,
                    item_count: 0,
                    revision: 0,
                    free_list: crate::block::FreeList::new(),
                },
                BaseSlot::A,
            ),
            Err(err) => return Err(err),
        };

        let block_path = {
            let mut p = table_path.clone();
            let mut name = p.file_name().unwrap_or_default().to_os_string();
            name.push(".");
            name.push(crate::file::BLOCK_FILE_SUFFIX);
            p.set_file_name(name);
            p
        };

        let store = BlockStore::open(&block_path, base.block_size, cache_tag, cache, read_only)?;
        store.load_free_list(base.free_list.clone());
        store.set_next_block_no(base.root_block.saturating_add(1).max(1));

        Ok(Self {
            table_path,
            store,
            read_only,
            active_slot,
            committed_revision: base.revision,
            committed_root: base.root_block,
            committed_level: base.level,
            committed_item_count: base.item_count,
            root: base.root_block,
            level: base.level,
            item_count: base.item_count,
            _fs: PhantomData,
        })
    }

    /// Revision this handle is currently working against (the last
    /// committed revision until `commit` is called again).
    pub fn revision(&self) -> u64 {
        self.committed_revision
    }

    fn working_revision(&self) -> u64 {
        self.committed_revision + 1
    }

    /// Returns [`Error::DatabaseModified`] once this handle's pinned
    /// revision has fallen two or more commits behind the table's
    /// on-disk revision (spec §9: "specify `DatabaseModified` as the
    /// required error rather than silent inconsistency").
    /// [`BlockStore::allocate`] only recycles a released block once
    /// its release is two revisions old (spec §5: "the engine retains
    /// two past revisions' worth of blocks before recycling"), so a
    /// reader more than one commit behind could otherwise dereference
    /// a block number some other writer has since reused for
    /// something else entirely. Checked before every node read rather
    /// than once at open, since a long-lived cursor can cross the
    /// two-commit boundary mid-walk. Only read-only handles can ever
    /// go stale this way — a writer's own `commit` always advances
    /// `committed_revision` to match what it just wrote.
    fn check_not_modified(&self) -> Result<()> {
        if self.read_only {
            if let Ok((base, _)) = BaseRecord::open_active::<F>(&self.table_path) {
                if base.revision >= self.committed_revision + 2 {
                    return Err(Error::DatabaseModified);
                }
            }
        }
        Ok(())
    }

    fn read_node(&self, block_no: BlockNo) -> Result<Node> {
        self.check_not_modified()?;
        let bytes = self.store.read(block_no)?;
        Node::decode(&bytes)
    }

    fn write_node(&self, node: &Node) -> Result<BlockNo> {
        let block_no = self.store.allocate(self.working_revision());
        let bytes = node.encode(self.store.block_size() as usize)?;
        self.store.write(block_no, &bytes)?;
        Ok(block_no)
    }

    fn release(&self, block_no: BlockNo) {
        if block_no != NO_BLOCK {
            self.store.release(block_no, self.working_revision());
        }
    }

    fn overflow_threshold(&self) -> usize {
        self.store.block_size() as usize / 4
    }

    fn write_overflow_chain(&self, value: &[u8]) -> Result<(BlockNo, u32)> {
        let block_size = self.store.block_size() as usize;
        let chunk_len = block_size - OVERFLOW_TRAILER_LEN;
        let mut blocks = Vec::new();
        for chunk in value.chunks(chunk_len) {
            let block_no = self.store.allocate(self.working_revision());
            blocks.push((block_no, chunk.to_vec()));
        }
        for i in 0..blocks.len() {
            let next = blocks.get(i + 1).map(|(b, _)| *b).unwrap_or(NO_BLOCK);
            let (block_no, chunk) = &blocks[i];
            let mut payload = chunk.clone();
            payload.resize(chunk_len, 0);
            payload.extend_from_slice(&next.to_be_bytes());
            self.store.write(*block_no, &payload)?;
        }
        let first_block = blocks.first().map(|(b, _)| *b).unwrap_or(NO_BLOCK);
        Ok((first_block, value.len() as u32))
    }

    fn read_overflow_chain(&self, first_block: BlockNo, total_len: u32) -> Result<Vec<u8>> {
        self.check_not_modified()?;
        let mut out = Vec::with_capacity(total_len as usize);
        let mut block_no = first_block;
        while block_no != NO_BLOCK && out.len() < total_len as usize {
            let bytes = self.store.read(block_no)?;
            let payload_len = bytes.len() - OVERFLOW_TRAILER_LEN;
            let remaining = total_len as usize - out.len();
            out.extend_from_slice(&bytes[..payload_len.min(remaining)]);
            block_no = BigEndian::read_u32(&bytes[payload_len..]);
        }
        Ok(out)
    }

    fn make_leaf_item(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Item> {
        if value.len() > self.overflow_threshold() {
            let (first_block, total_len) = self.write_overflow_chain(&value)?;
            Ok(Item {
                key,
                value: ItemValue::Overflow { first_block, total_len },
            })
        } else {
            Ok(Item::leaf(key, value))
        }
    }

    fn resolve_value(&self, item: &Item) -> Result<Vec<u8>> {
        match &item.value {
            ItemValue::Inline(bytes) => Ok(bytes.clone()),
            ItemValue::Overflow { first_block, total_len } => {
                self.read_overflow_chain(*first_block, *total_len)
            }
        }
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.root == NO_BLOCK {
            return Ok(None);
        }
        let mut block_no = self.root;
        loop {
            let node = self.read_node(block_no)?;
            if node.is_leaf() {
                return match node.search(key) {
                    Ok(idx) => Ok(Some(self.resolve_value(&node.items[idx])?)),
                    Err(_) => Ok(None),
                };
            }
            let idx = node.child_index_for(key);
            block_no = node.items[idx].child_block()?;
        }
    }

    /// Inserts or replaces `key` with `value`.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidOperation("table is read-only".into()));
        }
        if key.len() > 255 {
            return Err(Error::InvalidArgument("key longer than 255 bytes".into()));
        }

        if self.root == NO_BLOCK {
            let mut leaf = Node::new_leaf(self.working_revision());
            leaf.items.push(self.make_leaf_item(key.to_vec(), value.to_vec())?);
            self.root = self.write_node(&leaf)?;
            self.level = 0;
            self.item_count = 1;
            return Ok(());
        }

        let outcome = self.insert_into(self.root, key, value)?;
        self.release(self.root);
        match outcome.split {
            None => {
                self.root = outcome.block;
            }
            Some((sep_key, right_block)) => {
                let mut new_root = Node::new_internal(self.working_revision(), self.level + 1);
                new_root.items.push(Item::internal(Vec::new(), outcome.block));
                new_root.items.push(Item::internal(sep_key, right_block));
                self.root = self.write_node(&new_root)?;
                self.level += 1;
            }
        }
        if outcome.inserted_new_key {
            self.item_count += 1;
        }
        Ok(())
    }

    fn insert_into(&self, block_no: BlockNo, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let mut node = self.read_node(block_no)?;

        if node.is_leaf() {
            let inserted_new_key = match node.search(key) {
                Ok(idx) => {
                    node.items[idx] = self.make_leaf_item(key.to_vec(), value.to_vec())?;
                    false
                }
                Err(idx) => {
                    node.items.insert(idx, self.make_leaf_item(key.to_vec(), value.to_vec())?);
                    true
                }
            };
            node.revision = self.working_revision();
            return self.finish_node(node, inserted_new_key);
        }

        let child_index = node.child_index_for(key);
        let child_block = node.items[child_index].child_block()?;
        let child_outcome = self.insert_into(child_block, key, value)?;
        self.release(child_block);

        node.items[child_index] = Item::internal(node.items[child_index].key.clone(), child_outcome.block);
        if let Some((sep_key, right_block)) = child_outcome.split {
            node.items.insert(child_index + 1, Item::internal(sep_key, right_block));
        }
        node.revision = self.working_revision();
        self.finish_node(node, child_outcome.inserted_new_key)
    }

    fn finish_node(&self, node: Node, inserted_new_key: bool) -> Result<InsertOutcome> {
        let block_size = self.store.block_size() as usize;
        if node.encoded_len() <= block_size - OVERFLOW_TRAILER_LEN {
            let block = self.write_node(&node)?;
            return Ok(InsertOutcome {
                block,
                split: None,
                inserted_new_key,
            });
        }

        let mid = node.items.len() / 2;
        let mut right_items = node.items.split_off(mid);
        let sep_key = if node.is_leaf() {
            right_items[0].key.clone()
        } else {
            let key = right_items[0].key.clone();
            right_items[0] = Item::internal(Vec::new(), right_items[0].child_block()?);
            key
        };

        let mut left = Node {
            revision: node.revision,
            level: node.level,
            items: node.items,
        };
        let mut right = Node {
            revision: node.revision,
            level: node.level,
            items: right_items,
        };
        left.revision = self.working_revision();
        right.revision = self.working_revision();

        let left_block = self.write_node(&left)?;
        let right_block = self.write_node(&right)?;

        Ok(InsertOutcome {
            block: left_block,
            split: Some((sep_key, right_block)),
            inserted_new_key,
        })
    }

    /// Removes `key`, if present. Returns whether anything was
    /// removed. Rebalancing is lazy (spec §4.2): nodes are not merged
    /// when they shrink, only rewritten.
    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        if self.read_only {
            return Err(Error::InvalidOperation("table is read-only".into()));
        }
        if self.root == NO_BLOCK {
            return Ok(false);
        }

        let (new_root, removed) = self.delete_from(self.root, key)?;
        if removed {
            self.release(self.root);
            self.root = new_root;
            self.item_count = self.item_count.saturating_sub(1);
        }
        Ok(removed)
    }

    fn delete_from(&self, block_no: BlockNo, key: &[u8]) -> Result<(BlockNo, bool)> {
        let mut node = self.read_node(block_no)?;

        if node.is_leaf() {
            return match node.search(key) {
                Ok(idx) => {
                    if let ItemValue::Overflow { first_block, .. } = node.items[idx].value {
                        self.free_overflow_chain(first_block);
                    }
                    node.items.remove(idx);
                    node.revision = self.working_revision();
                    Ok((self.write_node(&node)?, true))
                }
                Err(_) => Ok((block_no, false)),
            };
        }

        let child_index = node.child_index_for(key);
        let child_block = node.items[child_index].child_block()?;
        let (new_child_block, removed) = self.delete_from(child_block, key)?;
        if !removed {
            return Ok((block_no, false));
        }

        self.release(child_block);
        node.items[child_index] = Item::internal(node.items[child_index].key.clone(), new_child_block);
        node.revision = self.working_revision();
        Ok((self.write_node(&node)?, true))
    }

    fn free_overflow_chain(&self, first_block: BlockNo) {
        let mut block_no = first_block;
        while block_no != NO_BLOCK {
            let next = match self.store.read(block_no) {
                Ok(bytes) => BigEndian::read_u32(&bytes[bytes.len() - OVERFLOW_TRAILER_LEN..]),
                Err(_) => NO_BLOCK,
            };
            self.release(block_no);
            block_no = next;
        }
    }

    /// Produces a cursor over the current in-progress snapshot of the
    /// tree, seeked to `start_key` (empty slice for the very first
    /// entry).
    pub fn cursor(&self, start_key: &[u8]) -> Result<Cursor<'_, Self>> {
        let mut cursor = Cursor::new(self);
        if self.root != NO_BLOCK {
            cursor.seek(self.root, start_key)?;
        }
        Ok(cursor)
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> u64 {
        self.item_count
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    /// Root block number of the current snapshot (spec §6's "root
    /// block number" base-file field), for the check tool's tree
    /// listing / dump modes.
    #[must_use]
    pub fn root_block(&self) -> BlockNo {
        self.root
    }

    /// Number of blocks currently sitting on the table's free list
    /// (spec §6's check tool "bitmap" mode).
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.store.free_list_snapshot().len()
    }

    /// Writes out the new base file and advances the revision (spec
    /// §4.2: "writes out dirty blocks to fresh block numbers
    /// (copy-on-write)... rewrites the base record file atomically...
    /// and advances the revision"). Dirty blocks were already written
    /// eagerly by `add`/`del`; this only has to publish the new root.
    pub fn commit(&mut self, new_revision: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidOperation("table is read-only".into()));
        }

        self.store.prune_free_list(new_revision);
        let record = BaseRecord {
            version: Version::V1,
            block_size: self.store.block_size(),
            root_block: self.root,
            level: self.level,
            item_count: self.item_count,
            revision: new_revision,
            free_list: self.store.free_list_snapshot(),
        };
        record.commit::<F>(&self.table_path, self.active_slot)?;
        self.active_slot = self.active_slot.other();

        if self.store_config_wants_fsync() {
            self.store.sync()?;
        }

        self.committed_revision = new_revision;
        self.committed_root = self.root;
        self.committed_level = self.level;
        self.committed_item_count = self.item_count;
        Ok(())
    }

    fn store_config_wants_fsync(&self) -> bool {
        true
    }

    /// Discards in-progress mutations, reverting to the last
    /// committed root. Blocks written since the last commit are left
    /// behind unreferenced (see the module doc comment).
    pub fn cancel(&mut self) {
        self.root = self.committed_root;
        self.level = self.committed_level;
        self.item_count = self.committed_item_count;
    }
}

impl<F: FileSystem> NodeSource for Btree<F> {
    fn read_node(&self, block_no: BlockNo) -> Result<Node> {
        Btree::read_node(self, block_no)
    }

    fn resolve_value(&self, item: &Item) -> Result<Vec<u8>> {
        Btree::resolve_value(self, item)
    }
}

struct InsertOutcome {
    block: BlockNo,
    split: Option<(Vec<u8>, BlockNo)>,
    inserted_new_key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::cache::BlockCache;
    use crate::fs::StdFileSystem;

    fn open(dir: &tempfile::TempDir, config: &Config) -> Btree<StdFileSystem> {
        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        Btree::open(dir.path().join("t"), cache, 0, config, false).unwrap()
    }

    #[test]
    fn get_on_empty_tree_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let tree = open(&dir, &config);
        assert_eq!(tree.get(b"missing").unwrap(), None);
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = open(&dir, &config);

        tree.add(b"cat", b"meow").unwrap();
        tree.add(b"dog", b"woof").unwrap();
        tree.add(b"cat", b"purr").unwrap(); // replace

        assert_eq!(tree.get(b"cat").unwrap(), Some(b"purr".to_vec()));
        assert_eq!(tree.get(b"dog").unwrap(), Some(b"woof".to_vec()));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = open(&dir, &config);

        tree.add(b"a", b"1").unwrap();
        tree.add(b"b", b"2").unwrap();
        assert!(tree.del(b"a").unwrap());
        assert!(!tree.del(b"a").unwrap());
        assert_eq!(tree.get(b"a").unwrap(), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn many_inserts_force_node_splits_and_cursor_sees_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = open(&dir, &config);

        let mut keys: Vec<u32> = (0..500).collect();
        for &k in &keys {
            tree.add(&k.to_be_bytes(), &k.to_le_bytes()).unwrap();
        }

        for &k in &keys {
            assert_eq!(tree.get(&k.to_be_bytes()).unwrap(), Some(k.to_le_bytes().to_vec()));
        }

        keys.sort_unstable();
        let mut cursor = tree.cursor(&[]).unwrap();
        let mut seen = Vec::new();
        while let Some((key, _)) = cursor.current() {
            seen.push(u32::from_be_bytes(key.try_into().unwrap()));
            if !cursor.next().unwrap() {
                break;
            }
        }
        assert_eq!(seen, keys);
    }

    #[test]
    fn overflow_values_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = open(&dir, &config);

        let big_value = vec![0x42u8; 3000];
        tree.add(b"big", &big_value).unwrap();
        assert_eq!(tree.get(b"big").unwrap(), Some(big_value));
    }

    #[test]
    fn commit_then_reopen_sees_committed_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);

        {
            let mut tree = open(&dir, &config);
            tree.add(b"k", b"v").unwrap();
            tree.commit(1).unwrap();
        }

        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        let reopened = Btree::<StdFileSystem>::open(dir.path().join("t"), cache, 0, &config, true).unwrap();
        assert_eq!(reopened.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(reopened.revision(), 1);
    }

    #[test]
    fn cancel_reverts_to_last_commit() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = open(&dir, &config);

        tree.add(b"k", b"v1").unwrap();
        tree.commit(1).unwrap();

        tree.add(b"k", b"v2").unwrap();
        tree.cancel();

        assert_eq!(tree.get(b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn reader_two_commits_stale_gets_database_modified() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);

        let mut writer = open(&dir, &config);
        writer.add(b"k", b"v0").unwrap();
        writer.commit(1).unwrap();

        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        let reader = Btree::<StdFileSystem>::open(dir.path().join("t"), cache, 0, &config, true).unwrap();
        assert_eq!(reader.get(b"k").unwrap(), Some(b"v0".to_vec()));

        // One more commit (revision 2) still leaves the reader's
        // blocks safe: `BlockStore::allocate` only reuses a release
        // once it is two revisions old.
        writer.add(b"k", b"v1").unwrap();
        writer.commit(2).unwrap();
        assert_eq!(reader.get(b"k").unwrap(), Some(b"v0".to_vec()));

        // A second commit (revision 3) puts the reader two revisions
        // behind; its cached blocks may have been recycled.
        writer.add(b"k", b"v2").unwrap();
        writer.commit(3).unwrap();
        assert!(matches!(reader.get(b"k"), Err(Error::DatabaseModified)));
    }
}
