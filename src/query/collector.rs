// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounded top-K match collection (spec §4.5/§6): walks a
//! [`PostingNode`] tree in docid order, scores each candidate, and
//! keeps only the `first + maxitems` best-ranked matches, with
//! optional percent/weight cutoffs and value-based collapsing.
//!
//! Grounded on the teacher crate's `merge.rs`, which keeps a bounded
//! k-way merge with `interval_heap::IntervalHeap` rather than a
//! `BinaryHeap` wrapped in `Reverse`: the interval heap's
//! `pop_min`/`pop_max` pair is exactly what a bounded top-K collector
//! needs (push every candidate, evict the current worst once the heap
//! grows past capacity).

use crate::error::Result;
use crate::query::iterator::PostingNode;
use crate::record::get_record;
use crate::btree::Btree;
use crate::fs::FileSystem;
use interval_heap::IntervalHeap;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Result ordering (spec §4.5/§6).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SortOrder {
    /// Highest weight first, docid ascending breaks ties.
    #[default]
    Relevance,
    /// Value ascending, docid ascending breaks ties.
    Value,
    /// Value ascending; among equal values, weight descending.
    ValueThenRelevance,
    /// Weight descending; among equal weights, value ascending.
    RelevanceThenValue,
}

/// Collection parameters (spec §6: "first, maxitems, percent cutoff,
/// weight cutoff, collapse key, sort order").
#[derive(Clone, Debug)]
pub struct CollectorSpec {
    pub first: u32,
    pub maxitems: u32,
    pub percent_cutoff: u8,
    pub weight_cutoff: f64,
    pub collapse_slot: Option<u32>,
    pub collapse_max: u32,
    pub sort_order: SortOrder,
}

impl Default for CollectorSpec {
    fn default() -> Self {
        Self {
            first: 0,
            maxitems: 10,
            percent_cutoff: 0,
            weight_cutoff: 0.0,
            collapse_slot: None,
            collapse_max: 1,
            sort_order: SortOrder::Relevance,
        }
    }
}

/// One matched document (spec §6 MSet item).
#[derive(Clone, Debug)]
pub struct Match {
    pub docid: u32,
    pub weight: f64,
    pub collapse_key: Option<Vec<u8>>,
    /// How many further documents were collapsed behind this one.
    pub collapse_count: u32,
}

/// Collected results plus cardinality bounds (spec §4.5/§6).
#[derive(Clone, Debug, Default)]
pub struct MatchResults {
    pub matches: Vec<Match>,
    pub matches_lower_bound: u32,
    pub matches_estimated: u32,
    pub matches_upper_bound: u32,
    pub max_possible: f64,
    pub max_attained: f64,
}

struct HeapEntry {
    rank_key: RankKey,
    docid: u32,
    weight: f64,
    collapse_key: Option<Vec<u8>>,
}

/// Sortable projection of a match under the active [`SortOrder`], so
/// the heap's `Ord` impl does not need to carry the order as runtime
/// state.
#[derive(Clone, Debug, PartialEq)]
enum RankKey {
    ByWeight(f64, u32),
    ByValue(Vec<u8>, u32),
    ValueThenWeight(Vec<u8>, f64, u32),
    WeightThenValue(f64, Vec<u8>, u32),
}

impl Eq for RankKey {}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::ByWeight(w1, d1), Self::ByWeight(w2, d2)) => {
                w1.partial_cmp(w2).unwrap_or(Ordering::Equal).then_with(|| d2.cmp(d1))
            }
            (Self::ByValue(v1, d1), Self::ByValue(v2, d2)) => v2.cmp(v1).then_with(|| d2.cmp(d1)),
            (Self::ValueThenWeight(v1, w1, d1), Self::ValueThenWeight(v2, w2, d2)) => v2
                .cmp(v1)
                .then_with(|| w1.partial_cmp(w2).unwrap_or(Ordering::Equal))
                .then_with(|| d2.cmp(d1)),
            (Self::WeightThenValue(w1, v1, d1), Self::WeightThenValue(w2, v2, d2)) => w1
                .partial_cmp(w2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| v2.cmp(v1))
                .then_with(|| d2.cmp(d1)),
            _ => unreachable!("all heap entries share one RankKey variant per collection run"),
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank_key == other.rank_key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank_key.cmp(&other.rank_key)
    }
}

fn rank_key(order: SortOrder, weight: f64, docid: u32, value: Option<&[u8]>) -> RankKey {
    match order {
        SortOrder::Relevance => RankKey::ByWeight(weight, docid),
        SortOrder::Value => RankKey::ByValue(value.unwrap_or_default().to_vec(), docid),
        SortOrder::ValueThenRelevance => RankKey::ValueThenWeight(value.unwrap_or_default().to_vec(), weight, docid),
        SortOrder::RelevanceThenValue => RankKey::WeightThenValue(weight, value.unwrap_or_default().to_vec(), docid),
    }
}

/// Walks `root` to completion, keeping the best `spec.first +
/// spec.maxitems` matches under `spec.sort_order`, collapsing on
/// `spec.collapse_slot` when set.
///
/// `decider`, if given, is consulted on every candidate before it is
/// weighed against the heap (spec §4.5: "an injectable predicate over
/// documents is consulted before the final heap insertion"). A
/// rejected document is simply skipped — it still advances `considered`
/// but `matches_estimated`/`matches_upper_bound` are derived from
/// term-frequency bounds rather than `considered`, so they are
/// unaffected either way, matching "documents rejected by the decider
/// still count toward matches_estimated". `promoted_decider`, if
/// given, runs only on documents that actually made it into the final
/// top-K (spec's "second hook may run on items already promoted, for
/// expensive checks"); a document it rejects is dropped from the
/// output without being replaced by the next-best candidate, since by
/// the time this hook runs the rest of the list has already been
/// discarded from the heap.
pub fn collect<F: FileSystem>(
    mut root: PostingNode<'_, F>,
    dbsize: u32,
    spec: &CollectorSpec,
    record_tree: &Btree<F>,
    decider: Option<&dyn Fn(u32) -> bool>,
    promoted_decider: Option<&dyn Fn(u32) -> bool>,
) -> Result<MatchResults> {
    let capacity = (spec.first + spec.maxitems).max(1) as usize;
    let mut heap: IntervalHeap<HeapEntry> = IntervalHeap::with_capacity(capacity);
    let mut heap_size = 0usize;
    let mut max_attained = 0.0f64;
    let mut considered = 0u32;
    // Per collapse-key best-`collapse_max` set (spec §4.5: "maintain
    // per-collapse-key best-K; items falling out of a collapse group
    // are discarded"). A later, higher-scoring arrival evicts the
    // group's current worst member rather than being discarded itself
    // just because it arrived second; `collapse_count` tallies every
    // document that was ever bumped out of its group, winner or not.
    let mut collapse_groups: FxHashMap<Vec<u8>, Vec<(RankKey, u32, f64)>> = FxHashMap::default();
    let mut collapse_count: FxHashMap<Vec<u8>, u32> = FxHashMap::default();

    let (tf_min, tf_max, tf_est) = root.termfreq_bounds(dbsize);
    let max_possible = root.max_weight();

    if root.at_end() {
        root.next(0.0)?;
    }

    while !root.at_end() {
        considered += 1;
        let docid = root.docid();
        let weight = root.weight()?;

        if spec.percent_cutoff > 0 && max_possible > 0.0 {
            let pct = (weight / max_possible * 100.0) as u8;
            if pct < spec.percent_cutoff {
                root.next(0.0)?;
                continue;
            }
        }
        if weight < spec.weight_cutoff {
            root.next(0.0)?;
            continue;
        }
        if let Some(decider) = decider {
            if !decider(docid) {
                root.next(0.0)?;
                continue;
            }
        }

        let value = match spec.collapse_slot {
            Some(slot) => get_record(record_tree, docid)?.and_then(|r| r.values.get(&slot).cloned()),
            None => None,
        };

        let rank = rank_key(spec.sort_order, weight, docid, value.as_deref());

        if let Some(key) = &value {
            let group = collapse_groups.entry(key.clone()).or_default();
            if group.len() < spec.collapse_max as usize {
                group.push((rank, docid, weight));
            } else if let Some(worst) = group.iter().enumerate().min_by(|a, b| a.1 .0.cmp(&b.1 .0)).map(|(i, _)| i) {
                if rank > group[worst].0 {
                    group[worst] = (rank, docid, weight);
                    *collapse_count.entry(key.clone()).or_insert(0) += 1;
                } else {
                    *collapse_count.entry(key.clone()).or_insert(0) += 1;
                }
            } else {
                // collapse_max == 0: every keyed document is collapsed away.
                *collapse_count.entry(key.clone()).or_insert(0) += 1;
            }
            root.next(0.0)?;
            continue;
        }

        max_attained = max_attained.max(weight);
        heap.push(HeapEntry {
            rank_key: rank,
            docid,
            weight,
            collapse_key: value,
        });
        heap_size += 1;
        if heap_size > capacity {
            heap.pop_min();
            heap_size -= 1;
        }

        root.next(0.0)?;
    }

    // Collapse groups are only resolved once the whole postlist has
    // been scanned (a later docid can still evict an earlier winner),
    // so their survivors join the top-K heap after the main loop
    // instead of as each candidate is seen.
    for (key, group) in collapse_groups {
        for (rank, docid, weight) in group {
            max_attained = max_attained.max(weight);
            heap.push(HeapEntry {
                rank_key: rank,
                docid,
                weight,
                collapse_key: Some(key.clone()),
            });
            heap_size += 1;
            if heap_size > capacity {
                heap.pop_min();
                heap_size -= 1;
            }
        }
    }

    let mut ordered: Vec<HeapEntry> = Vec::with_capacity(heap_size);
    while let Some(entry) = heap.pop_max() {
        ordered.push(entry);
    }

    let matches = ordered
        .into_iter()
        .skip(spec.first as usize)
        .filter(|e| match promoted_decider {
            Some(d) => d(e.docid),
            None => true,
        })
        .map(|e| Match {
            docid: e.docid,
            weight: e.weight,
            collapse_count: e.collapse_key.as_ref().map_or(0, |k| collapse_count.get(k).copied().unwrap_or(0)),
            collapse_key: e.collapse_key,
        })
        .collect();

    Ok(MatchResults {
        matches,
        matches_lower_bound: tf_min.min(considered),
        matches_estimated: tf_est,
        matches_upper_bound: tf_max,
        max_possible,
        max_attained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::cache::BlockCache;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use crate::postlist::writer::write_new_postlist;
    use crate::query::iterator::{DoclenSource, LeafIterator};
    use crate::query::weight::{Bm25Params, Bm25Weight, TermWeight};
    use crate::postlist::reader::PostingListReader;
    use std::sync::Arc;

    fn tree(dir: &tempfile::TempDir, name: &str, tag: u8) -> Btree<StdFileSystem> {
        let cache = Arc::new(BlockCache::with_capacity_bytes(1024 * 1024));
        let config = Config::new(dir.path()).block_size(2048);
        Btree::open(dir.path().join(name), cache, tag, &config, false).unwrap()
    }

    #[test]
    fn keeps_only_top_k_by_weight() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = tree(&dir, "postlist", 0);
        let record = tree(&dir, "record", 3);

        let postings: Vec<(u32, u32)> = (1u32..=20).map(|d| (d, d)).collect();
        write_new_postlist(&mut postlist, b"word", &postings).unwrap();
        let doclens: Vec<(u32, u32)> = (1u32..=20).map(|d| (d, 10)).collect();
        write_new_postlist(&mut postlist, b"", &doclens).unwrap();

        let doclen_source = DoclenSource::open(&postlist).unwrap();
        let reader = PostingListReader::open(&postlist, b"word").unwrap().unwrap();
        let weight = TermWeight::Bm25(Bm25Weight::new(Bm25Params::default(), 20, reader.termfreq, 10.0, 1, None));
        let root = PostingNode::Term(LeafIterator::new(reader, weight, &doclen_source));

        let spec = CollectorSpec {
            first: 0,
            maxitems: 5,
            ..Default::default()
        };
        let result = collect(root, 20, &spec, &record, None, None).unwrap();
        assert_eq!(result.matches.len(), 5);
        // Higher wdf (== docid here) scores higher under BM25, so the
        // top 5 should be the highest docids.
        let docids: Vec<u32> = result.matches.iter().map(|m| m.docid).collect();
        assert_eq!(docids, vec![20, 19, 18, 17, 16]);
    }

    #[test]
    fn collapse_keeps_the_better_scoring_arrival_even_when_it_arrives_later() {
        use crate::record::{put_record, DocumentRecord};
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let mut postlist = tree(&dir, "postlist", 0);
        let mut record = tree(&dir, "record", 3);

        // docid 1 (low wdf, low score) and docid 2 (high wdf, high
        // score) share collapse key "k"; docid 1 has the smaller
        // docid so a "first wins" collapse would wrongly keep it.
        let postings: Vec<(u32, u32)> = vec![(1, 1), (2, 50), (3, 1)];
        write_new_postlist(&mut postlist, b"word", &postings).unwrap();
        let doclens: Vec<(u32, u32)> = (1u32..=3).map(|d| (d, 10)).collect();
        write_new_postlist(&mut postlist, b"", &doclens).unwrap();

        for (docid, key) in [(1u32, b"k".to_vec()), (2, b"k".to_vec()), (3, b"other".to_vec())] {
            let mut values = BTreeMap::new();
            values.insert(0u32, key);
            put_record(&mut record, docid, &DocumentRecord { data: Vec::new(), values }).unwrap();
        }

        let doclen_source = DoclenSource::open(&postlist).unwrap();
        let reader = PostingListReader::open(&postlist, b"word").unwrap().unwrap();
        let weight = TermWeight::Bm25(Bm25Weight::new(Bm25Params::default(), 3, reader.termfreq, 10.0, 1, None));
        let root = PostingNode::Term(LeafIterator::new(reader, weight, &doclen_source));

        let spec = CollectorSpec {
            first: 0,
            maxitems: 10,
            collapse_slot: Some(0),
            collapse_max: 1,
            ..Default::default()
        };
        let result = collect(root, 3, &spec, &record, None, None).unwrap();

        let docids: Vec<u32> = result.matches.iter().map(|m| m.docid).collect();
        assert!(docids.contains(&2), "higher-scoring doc 2 must survive the collapse group");
        assert!(!docids.contains(&1), "lower-scoring doc 1 must be evicted once doc 2 arrives");
        assert!(docids.contains(&3));

        let winner = result.matches.iter().find(|m| m.docid == 2).unwrap();
        assert_eq!(winner.collapse_count, 1);
    }
}
