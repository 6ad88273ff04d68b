// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk layout constants and the atomic-rewrite primitive, grounded
//! on the teacher crate's `file.rs`. See spec §6 for the full layout:
//! a marker file, one `<name>.DB` block file and `<name>.baseA` /
//! `<name>.baseB` base record per table, an optional `changes` file,
//! and an optional process-wide lock file.

use crate::fs::FileSystem;
use std::{io::Write, path::Path};

/// Magic bytes for the database marker file.
pub const MAGIC_BYTES: [u8; 4] = [b's', b'n', b'd', b'g'];

/// Name of the marker file within a database directory.
pub const MARKER_FILE: &str = "sondage-core";

/// Name of the advisory writer lock file.
pub const LOCK_FILE: &str = "lock";

/// Suffix for a table's block file.
pub const BLOCK_FILE_SUFFIX: &str = "DB";

/// Suffixes for a table's two alternating base-record files.
pub const BASE_FILE_SUFFIXES: [&str; 2] = ["baseA", "baseB"];

/// Suffix for a table's optional per-commit change log, used by
/// replication shipping (out of scope here; the name is reserved so a
/// future writer can append to it without colliding).
pub const CHANGES_FILE_SUFFIX: &str = "changes";

/// Atomically rewrites a file: write to a temp file in the same
/// directory, fsync it, rename into place, then fsync the directory.
///
/// This is the primitive the B-tree base-file commit (spec §4.2) is
/// built on: "write-then-rename" is the crash-atomic half of the
/// two-base-file scheme.
pub fn rewrite_atomic<F: FileSystem>(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = F::open(path)?;
        file.sync_all()?;
        fsync_directory::<F>(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn fsync_directory<F: FileSystem>(path: &Path) -> std::io::Result<()> {
    let file = F::open(path)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;

    #[test]
    fn atomic_rewrite() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.txt");

        {
            let mut file = StdFileSystem::create(&path)?;
            file.write_all(b"stale content")?;
        }

        rewrite_atomic::<StdFileSystem>(&path, b"fresh content")?;

        assert_eq!(b"fresh content".to_vec(), StdFileSystem::read(&path)?);

        Ok(())
    }
}
