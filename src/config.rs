// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Database configuration, grounded on the teacher crate's `Config`
//! builder (`#[must_use]` setters validated with `assert!`, a
//! `Default` impl carrying the engine's real defaults).

use std::path::{Path, PathBuf};

/// Minimum allowed block size (spec §3: "≥ 2048").
pub const MIN_BLOCK_SIZE: u32 = 2_048;

/// Default block size (spec §3: "default 8192 bytes").
pub const DEFAULT_BLOCK_SIZE: u32 = 8_192;

/// Maximum postings per posting-list chunk before the writer splits
/// it (spec §4.3).
pub const MAX_ENTRIES_PER_CHUNK: usize = 2_000;

/// Minimum run length of consecutive docids that triggers a
/// fixed-width block (spec §4.3, §9).
pub const MIN_CONTIGUOUS_RUN: usize = 5;

/// Minimum ratio of "good bytes" to bytes actually used that a
/// fixed-width block must achieve (spec §4.3, §9).
pub const MIN_GOOD_BYTES_RATIO: f64 = 0.8;

/// Database directory configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory the database lives in.
    pub path: PathBuf,

    /// Block size used by every table's block store.
    pub block_size: u32,

    /// Byte capacity of the shared block cache.
    pub cache_capacity_bytes: u64,

    /// Maximum number of file descriptors the descriptor table may
    /// keep open at once.
    pub max_open_files: usize,

    /// Whether `commit` fsyncs the block file in addition to renaming
    /// the base file. Disabling this is only safe for throwaway
    /// databases (e.g. tests), since otherwise a host crash can lose
    /// committed data even though the base file claims it is durable.
    pub fsync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            block_size: DEFAULT_BLOCK_SIZE,
            cache_capacity_bytes: 16 * 1024 * 1024,
            max_open_files: 128,
            fsync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a new config rooted at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Sets the block size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`MIN_BLOCK_SIZE`] or is not a
    /// power of two.
    #[must_use]
    pub fn block_size(mut self, size: u32) -> Self {
        assert!(size >= MIN_BLOCK_SIZE, "block size too small");
        assert!(size.is_power_of_two(), "block size must be a power of two");
        self.block_size = size;
        self
    }

    /// Sets the block cache's byte capacity.
    #[must_use]
    pub fn cache_capacity_bytes(mut self, bytes: u64) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    /// Sets the maximum number of file descriptors kept open.
    #[must_use]
    pub fn max_open_files(mut self, n: usize) -> Self {
        assert!(n > 0, "must keep at least one file descriptor open");
        self.max_open_files = n;
        self
    }

    /// Disables fsync on commit. Only use for tests or throwaway data.
    #[must_use]
    pub fn without_fsync(mut self) -> Self {
        self.fsync_on_commit = false;
        self
    }
}
