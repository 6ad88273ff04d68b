// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shared block cache, grounded on the teacher crate's `cache.rs`:
//! a `quick_cache` instance keyed by `(table, block_no)`, weighted by
//! block size in bytes, with an `rustc_hash` hasher for speed.

use quick_cache::sync::{Cache as QuickCache, DefaultLifecycle};
use quick_cache::Weighter;
use std::sync::Arc;

#[derive(Clone, Eq, PartialEq, Hash)]
struct CacheKey(u8, u64);

#[derive(Clone)]
struct BlockWeighter;

impl Weighter<CacheKey, Arc<[u8]>> for BlockWeighter {
    fn weight(&self, _: &CacheKey, item: &Arc<[u8]>) -> u64 {
        item.len() as u64
    }
}

/// In-memory cache of raw block bytes, shared across every table in a
/// database directory (postlist, termlist, position, record,
/// spelling, synonym all read through the same cache instance).
///
/// Caching raw bytes (rather than decoded nodes) keeps the cache
/// agnostic to whether a block belongs to a B-tree node or a posting
/// chunk; decoding happens above the cache on every hit, which is
/// cheap relative to the I/O it saves.
pub struct BlockCache {
    data: QuickCache<CacheKey, Arc<[u8]>, BlockWeighter, rustc_hash::FxBuildHasher>,
    capacity: u64,
}

impl BlockCache {
    /// Creates a new block cache with roughly `bytes` of capacity.
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        let opts = quick_cache::OptionsBuilder::new()
            .weight_capacity(bytes)
            .hot_allocation(0.9)
            .estimated_items_capacity(10_000)
            .build()
            .unwrap_or_else(|_| quick_cache::OptionsBuilder::new().build().unwrap());

        let quick_cache = QuickCache::with_options(
            opts,
            BlockWeighter,
            rustc_hash::FxBuildHasher::default(),
            DefaultLifecycle::default(),
        );

        Self {
            data: quick_cache,
            capacity: bytes,
        }
    }

    /// Returns the cache's byte capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no blocks are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn get(&self, table_tag: u8, block_no: u64) -> Option<Arc<[u8]>> {
        self.data.get(&CacheKey(table_tag, block_no))
    }

    pub(crate) fn insert(&self, table_tag: u8, block_no: u64, bytes: Arc<[u8]>) {
        self.data.insert(CacheKey(table_tag, block_no), bytes);
    }

    pub(crate) fn invalidate(&self, table_tag: u8, block_no: u64) {
        self.data.remove(&CacheKey(table_tag, block_no));
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::with_capacity_bytes(16 * 1024 * 1024)
    }
}
