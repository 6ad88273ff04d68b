// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The termlist table (spec §2, §4.4): per-document reverse index of
//! which terms a document contributed postings for, and with what
//! wdf. `delete_document` needs this to know which posting lists to
//! remove the document's tombstone from without scanning every term
//! in the database; `replace_document` needs it to compute the delta
//! between the old and new term sets.
//!
//! Grounded on the original engine's termlist table (one entry per
//! document, listing every term it indexes) and on this port's own
//! [`crate::record`] for the "one Btree keyed by docid" shape.

use crate::btree::key::encode_docid;
use crate::btree::Btree;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::postlist::varint;
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// A document's term → wdf map, as last flushed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TermList {
    pub terms: BTreeMap<Vec<u8>, u32>,
}

impl TermList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl Encode for TermList {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        varint::write_uint(writer, self.terms.len() as u64)?;
        for (term, &wdf) in &self.terms {
            varint::write_uint(writer, term.len() as u64)?;
            writer.write_all(term)?;
            varint::write_uint(writer, u64::from(wdf))?;
        }
        Ok(())
    }
}

impl Decode for TermList {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let count = varint::read_uint(reader)?;
        let mut terms = BTreeMap::new();
        for _ in 0..count {
            let len = varint::read_uint(reader)? as usize;
            let mut term = vec![0u8; len];
            reader.read_exact(&mut term)?;
            let wdf = varint::read_uint(reader)? as u32;
            terms.insert(term, wdf);
        }
        Ok(Self { terms })
    }
}

fn termlist_key(docid: u32) -> Vec<u8> {
    encode_docid(docid)
}

/// Reads the term list for `docid`, or `None` if absent.
pub fn get_termlist<F: FileSystem>(tree: &Btree<F>, docid: u32) -> Result<Option<TermList>> {
    let Some(bytes) = tree.get(&termlist_key(docid))? else {
        return Ok(None);
    };
    let mut cursor = bytes.as_slice();
    TermList::decode_from(&mut cursor)
        .map(Some)
        .map_err(|e| crate::error::Error::DatabaseCorrupt {
            table: "termlist",
            detail: e.to_string(),
        })
}

/// Writes (replacing any existing) the term list for `docid`. An
/// empty term list deletes the key.
pub fn put_termlist<F: FileSystem>(tree: &mut Btree<F>, docid: u32, list: &TermList) -> Result<()> {
    if list.is_empty() {
        tree.del(&termlist_key(docid))?;
        return Ok(());
    }
    tree.add(&termlist_key(docid), &list.encode_into_vec())
}

/// Deletes the term list for `docid`, if any.
pub fn delete_termlist<F: FileSystem>(tree: &mut Btree<F>, docid: u32) -> Result<()> {
    tree.del(&termlist_key(docid))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::cache::BlockCache;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use std::sync::Arc;

    fn tree(dir: &tempfile::TempDir) -> Btree<StdFileSystem> {
        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        let config = Config::new(dir.path()).block_size(2048);
        Btree::open(dir.path().join("termlist"), cache, 1, &config, false).unwrap()
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = tree(&dir);
        let mut terms = BTreeMap::new();
        terms.insert(b"cat".to_vec(), 2);
        terms.insert(b"sat".to_vec(), 1);
        let list = TermList { terms };
        put_termlist(&mut tree, 1, &list).unwrap();
        assert_eq!(get_termlist(&tree, 1).unwrap().unwrap(), list);
        assert!(get_termlist(&tree, 2).unwrap().is_none());
    }

    #[test]
    fn empty_termlist_deletes_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = tree(&dir);
        put_termlist(&mut tree, 1, &TermList::default()).unwrap();
        assert!(get_termlist(&tree, 1).unwrap().is_none());
    }
}
