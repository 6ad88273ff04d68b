// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Position lists, the backing data for the PHRASE/NEAR query
//! operators (spec §4.4, §4.5). Out of scope for the chunked
//! posting-list codec (§4.3 only describes the `(docid, wdf)`
//! postlist and doclen list); this is a much smaller structure — one
//! B-tree value per `(term, docid)` pair holding the sorted word
//! positions a term occurred at in that document — so it is encoded
//! directly as a delta-varint blob rather than chunked.

use crate::btree::key::chunk_key;
use crate::btree::Btree;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::postlist::varint;

/// Encodes a sorted, deduplicated list of word positions.
#[must_use]
pub fn encode_positions(positions: &[u32]) -> Vec<u8> {
    let mut buf = Vec::new();
    varint::write_uint(&mut buf, positions.len() as u64).expect("vec write");
    let mut prev = 0u32;
    for &pos in positions {
        varint::write_uint(&mut buf, u64::from(pos - prev)).expect("vec write");
        prev = pos;
    }
    buf
}

/// Decodes a position list previously produced by [`encode_positions`].
pub fn decode_positions(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = bytes;
    let count = varint::read_uint(&mut cursor).map_err(|e| Error::DatabaseCorrupt {
        table: "position",
        detail: e.to_string(),
    })?;
    let mut positions = Vec::with_capacity(count as usize);
    let mut prev = 0u32;
    for _ in 0..count {
        let delta = varint::read_uint(&mut cursor).map_err(|e| Error::DatabaseCorrupt {
            table: "position",
            detail: e.to_string(),
        })?;
        prev += delta as u32;
        positions.push(prev);
    }
    Ok(positions)
}

/// Reads the position list for `(term, docid)`, or `None` if absent.
pub fn read_positions<F: FileSystem>(
    tree: &Btree<F>,
    term: &[u8],
    docid: u32,
) -> Result<Option<Vec<u32>>> {
    let key = chunk_key(term, docid)?;
    match tree.get(&key)? {
        Some(bytes) => Ok(Some(decode_positions(&bytes)?)),
        None => Ok(None),
    }
}

/// Writes (or replaces) the position list for `(term, docid)`.
pub fn write_positions<F: FileSystem>(
    tree: &mut Btree<F>,
    term: &[u8],
    docid: u32,
    positions: &[u32],
) -> Result<()> {
    let key = chunk_key(term, docid)?;
    tree.add(&key, &encode_positions(positions))
}

/// Deletes the position list for `(term, docid)`, if present.
pub fn delete_positions<F: FileSystem>(tree: &mut Btree<F>, term: &[u8], docid: u32) -> Result<()> {
    let key = chunk_key(term, docid)?;
    tree.del(&key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::cache::BlockCache;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use std::sync::Arc;

    #[test]
    fn encode_decode_roundtrip() {
        let positions = vec![1u32, 2, 5, 100, 101];
        let bytes = encode_positions(&positions);
        assert_eq!(decode_positions(&bytes).unwrap(), positions);
    }

    #[test]
    fn store_and_fetch_positions() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        let config = Config::new(dir.path()).block_size(2048);
        let mut tree = Btree::<StdFileSystem>::open(dir.path().join("position"), cache, 0, &config, false).unwrap();

        write_positions(&mut tree, b"cat", 7, &[3, 9, 12]).unwrap();
        assert_eq!(read_positions(&tree, b"cat", 7).unwrap(), Some(vec![3, 9, 12]));
        assert_eq!(read_positions(&tree, b"cat", 8).unwrap(), None);

        delete_positions(&mut tree, b"cat", 7).unwrap();
        assert_eq!(read_positions(&tree, b"cat", 7).unwrap(), None);
    }
}
