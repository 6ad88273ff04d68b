// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The inverter (spec §4.4): buffers added/removed/updated postings
//! and doclengths in memory between commits, then rewrites exactly
//! the affected posting-list chunks on flush.
//!
//! Grounded on the original engine's `BrassInverter`
//! (`brass_inverter.h`/`.cc`): a per-term record of pending changes,
//! flushed in term order so chunk rewrites are deterministic. This
//! port keeps the spec's `tf_delta`/`cf_delta` bookkeeping on
//! [`PendingTerm`] so callers can inspect in-flight statistics without
//! touching disk, but the actual flush defers to
//! [`crate::postlist::writer::rewrite_term`], which recomputes
//! termfreq/collfreq by re-reading and re-merging the term's current
//! postings — cheaper to reason about correctly than keeping the
//! deltas and the on-disk counters in lockstep by hand.

use crate::btree::Btree;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::position;
use crate::postlist::writer::rewrite_term;
use crate::table::TableSet;
use std::collections::BTreeMap;

/// Pending changes for one term, not yet flushed to disk.
#[derive(Clone, Debug, Default)]
pub struct PendingTerm {
    /// Signed change to termfreq once flushed.
    pub tf_delta: i64,
    /// Signed change to collfreq once flushed.
    pub cf_delta: i64,
    /// docid → new wdf, or `None` for a tombstone (pending deletion).
    pub postings: BTreeMap<u32, Option<u32>>,
}

/// Buffers postings, doclengths and position lists between commits.
#[derive(Default)]
pub struct Inverter {
    terms: BTreeMap<Vec<u8>, PendingTerm>,
    doclens: BTreeMap<u32, Option<u32>>,
    positions: BTreeMap<Vec<u8>, BTreeMap<u32, Option<Vec<u32>>>>,
}

impl Inverter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether there is anything buffered to flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.doclens.is_empty() && self.positions.is_empty()
    }

    /// Records a new posting: increments `tf_delta` by 1, `cf_delta`
    /// by `wdf`.
    pub fn add_posting(&mut self, did: u32, term: &[u8], wdf: u32) {
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.tf_delta += 1;
        entry.cf_delta += i64::from(wdf);
        entry.postings.insert(did, Some(wdf));
    }

    /// Records a posting's removal: decrements `tf_delta` by 1,
    /// `cf_delta` by `wdf`, leaves a tombstone until flush.
    pub fn remove_posting(&mut self, did: u32, term: &[u8], wdf: u32) {
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.tf_delta -= 1;
        entry.cf_delta -= i64::from(wdf);
        entry.postings.insert(did, None);
    }

    /// Records a posting's wdf changing from `old_wdf` to `new_wdf`
    /// without touching termfreq.
    pub fn update_posting(&mut self, did: u32, term: &[u8], old_wdf: u32, new_wdf: u32) {
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.cf_delta += i64::from(new_wdf) - i64::from(old_wdf);
        entry.postings.insert(did, Some(new_wdf));
    }

    /// Records `did`'s document length (stored via the doclen
    /// postlist, spec §3: "a posting list for the empty term").
    pub fn set_doclength(&mut self, did: u32, doclen: u32) {
        self.doclens.insert(did, Some(doclen));
    }

    /// Records that `did`'s doclength entry should be removed.
    pub fn delete_doclength(&mut self, did: u32) {
        self.doclens.insert(did, None);
    }

    /// Records `did`'s position list for `term`.
    pub fn set_positions(&mut self, did: u32, term: &[u8], positions: Vec<u32>) {
        self.positions
            .entry(term.to_vec())
            .or_default()
            .insert(did, Some(positions));
    }

    /// Records that `did`'s position list for `term` should be
    /// removed.
    pub fn delete_positions(&mut self, did: u32, term: &[u8]) {
        self.positions
            .entry(term.to_vec())
            .or_default()
            .insert(did, None);
    }

    /// Discards every buffered change; the database is left untouched
    /// (spec §4.4: "cancel(): discard buffers, database untouched").
    pub fn cancel(&mut self) {
        self.terms.clear();
        self.doclens.clear();
        self.positions.clear();
    }

    /// Borrows the pending record for `term`, if any is buffered.
    #[must_use]
    pub fn pending_term(&self, term: &[u8]) -> Option<&PendingTerm> {
        self.terms.get(term)
    }

    /// Flushes every buffered change into `tables`'s postlist and
    /// position tables. Flush order is lexicographic by term (spec
    /// §4.4: "deterministic in term order so that crash-recovery /
    /// changeset shipping can stream chunks in a predictable
    /// sequence"); `BTreeMap` iteration is already in that order.
    pub fn flush_all<F: FileSystem>(&mut self, tables: &mut TableSet<F>) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        {
            let postlist = tables.postlist_mut();
            for (term, pending) in &self.terms {
                rewrite_term(postlist, term, &pending.postings)?;
            }
            if !self.doclens.is_empty() {
                rewrite_term(postlist, b"", &self.doclens)?;
            }
        }

        if !self.positions.is_empty() {
            let position_table = tables.table_mut("position")?;
            flush_positions(position_table, &self.positions)?;
        }

        log::debug!(
            "inverter flushed {} term(s), {} doclen change(s), {} position list(s)",
            self.terms.len(),
            self.doclens.len(),
            self.positions.len(),
        );

        self.cancel();
        Ok(())
    }
}

fn flush_positions<F: FileSystem>(
    tree: &mut Btree<F>,
    positions: &BTreeMap<Vec<u8>, BTreeMap<u32, Option<Vec<u32>>>>,
) -> Result<()> {
    for (term, by_doc) in positions {
        for (&did, change) in by_doc {
            match change {
                Some(pos) => position::write_positions(tree, term, did, pos)?,
                None => position::delete_positions(tree, term, did)?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use crate::postlist::reader::PostingListReader;

    #[test]
    fn add_then_flush_creates_postlist() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tables = TableSet::<StdFileSystem>::open(dir.path(), &config, false).unwrap();

        let mut inverter = Inverter::new();
        inverter.add_posting(1, b"cat", 2);
        inverter.add_posting(2, b"cat", 1);
        inverter.set_doclength(1, 2);
        inverter.set_doclength(2, 1);
        assert!(!inverter.is_empty());

        inverter.flush_all(&mut tables).unwrap();
        assert!(inverter.is_empty());

        let reader = PostingListReader::open(tables.postlist(), b"cat").unwrap().unwrap();
        assert_eq!(reader.termfreq, 2);
        assert_eq!(reader.collfreq, 3);
    }

    #[test]
    fn remove_posting_tombstones_then_flush_removes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let mut tables = TableSet::<StdFileSystem>::open(dir.path(), &config, false).unwrap();

        let mut inverter = Inverter::new();
        inverter.add_posting(1, b"cat", 2);
        inverter.add_posting(2, b"cat", 1);
        inverter.flush_all(&mut tables).unwrap();

        inverter.remove_posting(1, b"cat", 2);
        inverter.flush_all(&mut tables).unwrap();

        let reader = PostingListReader::open(tables.postlist(), b"cat").unwrap().unwrap();
        assert_eq!(reader.termfreq, 1);
        assert_eq!(reader.current(), Some((2, 1)));
    }

    #[test]
    fn cancel_discards_buffer_without_touching_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).block_size(2048);
        let tables = TableSet::<StdFileSystem>::open(dir.path(), &config, false).unwrap();

        let mut inverter = Inverter::new();
        inverter.add_posting(1, b"cat", 2);
        inverter.cancel();
        assert!(inverter.is_empty());
        assert!(PostingListReader::open(tables.postlist(), b"cat").unwrap().is_none());
    }
}
