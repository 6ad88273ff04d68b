// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block store proper: owns one data file, hands out fixed-size
//! blocks by number, and tracks which ones are free.
//!
//! Grounded on the teacher crate's descriptor-table pattern
//! (`descriptor_table/mod.rs`'s `Mutex<BufReader<File>>` guarding a
//! single file handle) simplified to one mutex-guarded handle per
//! table, since spec §5 only ever has one writer and readers never
//! mutate their file handle's position concurrently with a write.

use crate::block::cache::BlockCache;
use crate::block::free_list::FreeList;
use crate::block::{BlockNo, NO_BLOCK};
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const CHECKSUM_LEN: u64 = 16;

/// A file of fixed-size blocks with a free list (spec §4.1).
pub struct BlockStore {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    block_size: u32,
    /// Tag used to namespace this table's entries within the shared
    /// [`BlockCache`].
    cache_tag: u8,
    cache: Arc<BlockCache>,
    free_list: Mutex<FreeList>,
    next_block_no: Mutex<BlockNo>,
    read_only: bool,
}

impl BlockStore {
    /// Opens (creating if necessary) the block file at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        block_size: u32,
        cache_tag: u8,
        cache: Arc<BlockCache>,
        read_only: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(&path)?;

        let physical_block_len = u64::from(block_size) + CHECKSUM_LEN;
        let file_len = file.metadata()?.len();
        let block_count = file_len / physical_block_len;
        let next_block_no = block_count.max(1) as BlockNo; // block 0 reserved

        Ok(Self {
            path,
            file: Mutex::new(file),
            block_size,
            cache_tag,
            cache,
            free_list: Mutex::new(FreeList::new()),
            next_block_no: Mutex::new(next_block_no),
            read_only,
        })
    }

    /// Path to the underlying block file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured block size (payload bytes, excluding the checksum
    /// trailer this layer adds).
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn physical_offset(&self, block_no: BlockNo) -> u64 {
        u64::from(block_no) * (u64::from(self.block_size) + CHECKSUM_LEN)
    }

    /// Reads a block's payload, verifying its checksum.
    pub fn read(&self, block_no: BlockNo) -> Result<Arc<[u8]>> {
        if block_no == NO_BLOCK {
            return Err(Error::InvalidArgument("block 0 is reserved".into()));
        }

        if let Some(cached) = self.cache.get(self.cache_tag, u64::from(block_no)) {
            return Ok(cached);
        }

        let mut buf = vec![0u8; (self.block_size as u64 + CHECKSUM_LEN) as usize];
        {
            let mut file = self.file.lock().expect("block store mutex poisoned");
            file.seek(SeekFrom::Start(self.physical_offset(block_no)))?;
            file.read_exact(&mut buf)?;
        }

        let stored = Checksum::from_raw(u128::from_be_bytes(
            buf[..16].try_into().expect("16 bytes"),
        ));
        let payload = &buf[16..];
        let computed = Checksum::of(payload);
        computed.check(stored)?;

        let bytes: Arc<[u8]> = Arc::from(payload);
        self.cache.insert(self.cache_tag, u64::from(block_no), bytes.clone());
        Ok(bytes)
    }

    /// Writes a block's payload (must be exactly `block_size` bytes).
    /// Does not sync; call [`BlockStore::sync`] when durability is
    /// required.
    pub fn write(&self, block_no: BlockNo, payload: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidOperation("table is read-only".into()));
        }
        if block_no == NO_BLOCK {
            return Err(Error::InvalidArgument("block 0 is reserved".into()));
        }
        if payload.len() != self.block_size as usize {
            return Err(Error::InvalidArgument(format!(
                "payload length {} does not match block size {}",
                payload.len(),
                self.block_size
            )));
        }

        let checksum = Checksum::of(payload);
        let mut framed = Vec::with_capacity(payload.len() + 16);
        framed.extend_from_slice(&checksum.into_u128().to_be_bytes());
        framed.extend_from_slice(payload);

        {
            let mut file = self.file.lock().expect("block store mutex poisoned");
            file.seek(SeekFrom::Start(self.physical_offset(block_no)))?;
            file.write_all(&framed)?;
        }

        self.cache
            .insert(self.cache_tag, u64::from(block_no), Arc::from(payload));

        Ok(())
    }

    /// Allocates a block number: reuses a freed block whose release is
    /// at least two revisions old, otherwise extends the file.
    pub fn allocate(&self, current_revision: u64) -> BlockNo {
        if let Some(block_no) = self
            .free_list
            .lock()
            .expect("free list mutex poisoned")
            .try_allocate(current_revision)
        {
            self.cache.invalidate(self.cache_tag, u64::from(block_no));
            return block_no;
        }

        let mut next = self.next_block_no.lock().expect("counter mutex poisoned");
        let block_no = *next;
        *next += 1;
        block_no
    }

    /// Marks a block as reusable once `revision` is two revisions
    /// old.
    pub fn release(&self, block_no: BlockNo, revision: u64) {
        self.free_list
            .lock()
            .expect("free list mutex poisoned")
            .release(block_no, revision);
    }

    /// Drops entries from the free list that are now older than two
    /// revisions behind `revision` (housekeeping only; `allocate`
    /// already skips entries that are too young).
    pub fn prune_free_list(&self, revision: u64) {
        self.free_list
            .lock()
            .expect("free list mutex poisoned")
            .prune_before(revision);
    }

    /// Returns a snapshot of the current free list, for persisting
    /// into a base file at commit time.
    pub fn free_list_snapshot(&self) -> FreeList {
        self.free_list.lock().expect("free list mutex poisoned").clone()
    }

    /// Replaces the in-memory free list, used when opening a table at
    /// a base file's recorded state.
    pub fn load_free_list(&self, free_list: FreeList) {
        *self.free_list.lock().expect("free list mutex poisoned") = free_list;
    }

    /// Sets the next block number to allocate, used when opening a
    /// table so fresh allocations never collide with blocks already
    /// referenced by the tree.
    pub fn set_next_block_no(&self, next: BlockNo) {
        let mut guard = self.next_block_no.lock().expect("counter mutex poisoned");
        if next > *guard {
            *guard = next;
        }
    }

    /// Flushes outstanding writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file
            .lock()
            .expect("block store mutex poisoned")
            .sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> BlockStore {
        BlockStore::open(
            dir.path().join("test.DB"),
            2048,
            0,
            Arc::new(BlockCache::with_capacity_bytes(1024 * 1024)),
            false,
        )
        .unwrap()
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let block_no = store.allocate(0);
        let payload = vec![0xABu8; 2048];
        store.write(block_no, &payload).unwrap();

        let read_back = store.read(block_no).unwrap();
        assert_eq!(&*read_back, payload.as_slice());
    }

    #[test]
    fn corrupted_block_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let block_no = store.allocate(0);
        store.write(block_no, &vec![1u8; 2048]).unwrap();

        // Corrupt one payload byte directly on disk, bypassing the
        // store's own write path and its cache.
        {
            let mut file = store.file.lock().unwrap();
            file.seek(SeekFrom::Start(store.physical_offset(block_no) + 16))
                .unwrap();
            file.write_all(&[2u8]).unwrap();
        }
        store.cache.invalidate(store.cache_tag, u64::from(block_no));

        assert!(store.read(block_no).is_err());
    }

    #[test]
    fn freed_blocks_are_reused_after_two_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let a = store.allocate(0);
        store.release(a, 0);

        let b = store.allocate(1);
        assert_ne!(a, b, "block should not be reused too early");

        let c = store.allocate(2);
        assert_eq!(a, c, "block should be reused once two revisions passed");
    }

    #[test]
    fn block_zero_is_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(store.read(NO_BLOCK).is_err());
        assert!(store.write(NO_BLOCK, &vec![0u8; 2048]).is_err());
    }
}
