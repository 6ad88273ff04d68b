// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The matcher's top-level entry point (spec §4.5): wires a
//! [`Query`] tree, an open [`TableSet`], and a [`CollectorSpec`]
//! together into an [`MSet`].
//!
//! Grounded on the original engine's `Enquire`: a thin façade that
//! gathers collection-wide statistics (document count, average
//! length), compiles the query, and drives collection — kept here
//! rather than folded into [`crate::database`] since it only needs
//! read access to a [`TableSet`], not the inverter or the write path.

use crate::error::Result;
use crate::fs::FileSystem;
use crate::mset::MSet;
use crate::postlist::reader::PostingListReader;
use crate::query::collector::{collect, CollectorSpec};
use crate::query::iterator::DoclenSource;
use crate::query::weight::RelevanceCounts;
use crate::query::{compile, Query, QueryContext, WeightingScheme};
use crate::table::TableSet;

/// Collection-wide statistics needed before any term weight can be
/// built (spec §4.5: IDF and length-normalisation both need `N` and
/// `avgdl`).
#[derive(Copy, Clone, Debug)]
pub struct CollectionStats {
    pub doc_count: u32,
    pub avgdl: f64,
}

/// Computes [`CollectionStats`] by scanning the doclen postlist once
/// (spec §3: "a posting list for the empty term" holds per-document
/// lengths). A production matcher would keep a running total
/// maintained by the inverter instead of rescanning per query; this
/// port favours the simpler, obviously-correct version since nothing
/// in the spec's invariants requires O(1) stats.
pub fn collection_stats<F: FileSystem>(tables: &TableSet<F>) -> Result<CollectionStats> {
    let Some(mut reader) = PostingListReader::open(tables.postlist(), b"")? else {
        return Ok(CollectionStats { doc_count: 0, avgdl: 0.0 });
    };
    let mut count = 0u64;
    let mut total = 0u64;
    loop {
        if let Some((_, doclen)) = reader.current() {
            count += 1;
            total += u64::from(doclen);
        }
        if !reader.next()? {
            break;
        }
    }
    let avgdl = if count == 0 { 0.0 } else { total as f64 / count as f64 };
    Ok(CollectionStats {
        doc_count: count as u32,
        avgdl,
    })
}

/// Runs `query` against `tables` and returns the top
/// `spec.first + spec.maxitems` ranked results (spec §4.5/§6).
///
/// `decider`, when given, is the match_decider hook (spec §4.5):
/// consulted on every candidate before it is weighed for the result
/// heap.
pub fn get_mset<F: FileSystem>(
    query: &Query,
    tables: &TableSet<F>,
    scheme: WeightingScheme,
    relevance: Option<RelevanceCounts>,
    spec: &CollectorSpec,
    decider: Option<&dyn Fn(u32) -> bool>,
) -> Result<MSet> {
    let stats = collection_stats(tables)?;
    let doclens = DoclenSource::open(tables.postlist())?;
    let ctx = QueryContext {
        collection_size: stats.doc_count,
        avgdl: stats.avgdl,
        scheme,
        relevance,
        querysize: query_term_count(query),
    };

    let mut root = compile(query, tables, &doclens, &ctx)?;
    // BM25's per-document "sumextra" term (spec §4.5) is independent
    // of any one term, so it is added once at the tree root rather
    // than inside each leaf's `weight()` — see
    // `PostingNode::DocumentExtra`'s doc comment for why wrapping here
    // (the one true root, as opposed to `compile`'s recursive calls)
    // is what keeps it from being double-counted.
    if let WeightingScheme::Bm25(params) = ctx.scheme {
        if params.k2 != 0.0 {
            let extra = crate::query::weight::Bm25Weight::new(params, stats.doc_count, 1, stats.avgdl, 1, None);
            root = crate::query::iterator::PostingNode::DocumentExtra {
                inner: Box::new(root),
                doclens: &doclens,
                extra,
                querysize: ctx.querysize,
            };
        }
    }
    let results = collect(root, stats.doc_count, spec, tables.table("record")?, decider, None)?;
    Ok(MSet::from_results(spec.first, results))
}

/// Number of term leaves in `query`, used for BM25's `sumextra`
/// (spec §4.5: "2·k2·|q|/(1+|d|/avgdl)", where `|q|` is query size).
fn query_term_count(query: &Query) -> u32 {
    match query {
        Query::Term { .. } | Query::MatchAll | Query::ValueRange { .. } => 1,
        Query::MatchNothing => 0,
        Query::And(cs) | Query::Or(cs) | Query::Xor(cs) | Query::Synonym(cs) => {
            cs.iter().map(query_term_count).sum()
        }
        Query::AndNot(l, r) | Query::AndMaybe(l, r) => query_term_count(l) + query_term_count(r),
        Query::Scale(inner, _) => query_term_count(inner),
        Query::Phrase(terms) | Query::Near { terms, .. } => terms.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use crate::postlist::writer::write_new_postlist;

    fn open_tables(dir: &tempfile::TempDir) -> TableSet<StdFileSystem> {
        let config = Config::new(dir.path()).block_size(2048);
        TableSet::<StdFileSystem>::open(dir.path(), &config, false).unwrap()
    }

    #[test]
    fn ranks_documents_with_higher_wdf_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = open_tables(&dir);
        let postings: Vec<(u32, u32)> = vec![(1, 1), (2, 5), (3, 2)];
        write_new_postlist(tables.postlist_mut(), b"ocean", &postings).unwrap();
        let doclens: Vec<(u32, u32)> = vec![(1, 100), (2, 100), (3, 100)];
        write_new_postlist(tables.postlist_mut(), b"", &doclens).unwrap();

        let query = Query::term(b"ocean".to_vec());
        let spec = CollectorSpec {
            first: 0,
            maxitems: 10,
            ..Default::default()
        };
        let mset = get_mset(&query, &tables, WeightingScheme::default(), None, &spec, None).unwrap();
        assert_eq!(mset.items.len(), 3);
        assert_eq!(mset.items[0].docid, 2);
        assert!(mset.items[0].weight >= mset.items[1].weight);
        assert!(mset.items[1].weight >= mset.items[2].weight);
    }

    #[test]
    fn and_query_returns_intersection_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = open_tables(&dir);
        write_new_postlist(tables.postlist_mut(), b"a", &[(1, 1), (2, 1), (3, 1)]).unwrap();
        write_new_postlist(tables.postlist_mut(), b"b", &[(2, 1), (3, 1), (4, 1)]).unwrap();
        write_new_postlist(tables.postlist_mut(), b"", &(1u32..=4).map(|d| (d, 10)).collect::<Vec<_>>()).unwrap();

        let query = Query::And(vec![Query::term(b"a".to_vec()), Query::term(b"b".to_vec())]);
        let spec = CollectorSpec { first: 0, maxitems: 10, ..Default::default() };
        let mset = get_mset(&query, &tables, WeightingScheme::default(), None, &spec, None).unwrap();
        let mut docids: Vec<u32> = mset.items.iter().map(|i| i.docid).collect();
        docids.sort_unstable();
        assert_eq!(docids, vec![2, 3]);
    }

    #[test]
    fn bm25_sumextra_is_added_once_per_matching_document() {
        use crate::query::weight::Bm25Params;

        let dir = tempfile::tempdir().unwrap();
        let mut tables = open_tables(&dir);
        write_new_postlist(tables.postlist_mut(), b"ocean", &[(1, 2)]).unwrap();
        write_new_postlist(tables.postlist_mut(), b"", &[(1, 50)]).unwrap();

        let query = Query::term(b"ocean".to_vec());
        let spec = CollectorSpec { first: 0, maxitems: 10, ..Default::default() };

        let params0 = Bm25Params { k2: 0.0, ..Bm25Params::default() };
        let mset0 = get_mset(&query, &tables, WeightingScheme::Bm25(params0), None, &spec, None).unwrap();

        let params1 = Bm25Params { k2: 1.0, ..Bm25Params::default() };
        let mset1 = get_mset(&query, &tables, WeightingScheme::Bm25(params1), None, &spec, None).unwrap();

        assert_eq!(mset0.items.len(), 1);
        assert_eq!(mset1.items.len(), 1);
        assert!(
            mset1.items[0].weight > mset0.items[0].weight,
            "k2 != 0 must add a positive per-document sumextra term"
        );

        // One document of doclen 50 makes avgdl = 50, so normlen = 1.0
        // for that document; sumextra = 2*k2*querysize/(1+normlen).
        let expected_extra = 2.0 * 1.0 * 1.0 / (1.0 + 1.0);
        assert!((mset1.items[0].weight - mset0.items[0].weight - expected_extra).abs() < 1e-9);
    }
}
