// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Query evaluation (spec §4.5, §4.6): a user-facing [`Query`] tree is
//! compiled into a [`iterator::PostingNode`] evaluation tree bound to
//! an open [`crate::table::TableSet`], then driven by
//! [`collector::collect`] to produce an [`crate::mset::MSet`].
//!
//! Module layout mirrors the teacher crate's own top-level `pub mod`
//! fan-out: one file per concern (weighting, iterator tree,
//! collection, top-level entry point) rather than one large module.

pub mod collector;
pub mod iterator;
pub mod matcher;
pub mod weight;

use crate::btree::Btree;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::postlist::reader::PostingListReader;
use crate::query::iterator::{DoclenSource, LeafIterator, PositionLookup, PostingNode, ValueLookup};
use crate::query::weight::{Bm25Params, Bm25Weight, RelevanceCounts, TermWeight, TradWeight};
use crate::table::TableSet;

/// Ranking scheme selection (spec §4.5).
#[derive(Copy, Clone, Debug)]
pub enum WeightingScheme {
    Bm25(Bm25Params),
    Trad { k: f64 },
    Bool,
}

impl Default for WeightingScheme {
    fn default() -> Self {
        Self::Bm25(Bm25Params::default())
    }
}

/// A user-facing Boolean/ranked query tree (spec §4.5).
#[derive(Clone, Debug)]
pub enum Query {
    Term { text: Vec<u8>, wqf: u32 },
    MatchAll,
    MatchNothing,
    And(Vec<Query>),
    Or(Vec<Query>),
    AndNot(Box<Query>, Box<Query>),
    AndMaybe(Box<Query>, Box<Query>),
    Xor(Vec<Query>),
    /// OR that sums wdfs under one shared weight object (spec §4.5).
    Synonym(Vec<Query>),
    Scale(Box<Query>, f64),
    ValueRange { slot: u32, lo: Vec<u8>, hi: Vec<u8> },
    /// Ordered phrase: terms must appear contiguously, in order.
    Phrase(Vec<Vec<u8>>),
    /// Unordered proximity: every term within `window` positions of
    /// the first.
    Near { terms: Vec<Vec<u8>>, window: u32 },
}

impl Query {
    #[must_use]
    pub fn term(text: impl Into<Vec<u8>>) -> Self {
        Self::Term { text: text.into(), wqf: 1 }
    }
}

/// Term statistics needed to build a weight object, gathered once
/// before compiling the tree (spec §4.5: "precomputed once per
/// term").
pub(crate) struct QueryContext {
    pub(crate) collection_size: u32,
    pub(crate) avgdl: f64,
    pub(crate) scheme: WeightingScheme,
    pub(crate) relevance: Option<RelevanceCounts>,
    pub(crate) querysize: u32,
}

fn make_weight(ctx: &QueryContext, termfreq: u32, wqf: u32) -> TermWeight {
    match ctx.scheme {
        WeightingScheme::Bm25(params) => TermWeight::Bm25(Bm25Weight::new(
            params,
            ctx.collection_size,
            termfreq,
            ctx.avgdl,
            wqf,
            ctx.relevance,
        )),
        WeightingScheme::Trad { k } => {
            TermWeight::Trad(TradWeight::new(k, ctx.collection_size, termfreq, ctx.avgdl, ctx.relevance))
        }
        WeightingScheme::Bool => TermWeight::Bool(weight::BoolWeight),
    }
}

/// Compiles `query` into an evaluation tree bound to `tables`. Leaves
/// for terms absent from the postlist compile down to
/// [`PostingNode::MatchNothing`] (spec §4.5: an empty posting list is
/// simply never a match, not an error).
pub fn compile<'a, F: FileSystem>(
    query: &Query,
    tables: &'a TableSet<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
) -> Result<PostingNode<'a, F>> {
    match query {
        Query::Term { text, wqf } => compile_term(text, *wqf, tables.postlist(), doclens, ctx),
        Query::MatchAll => compile_match_all(tables.postlist(), doclens, ctx),
        Query::MatchNothing => Ok(PostingNode::MatchNothing),
        Query::And(children) => compile_and(children, tables, doclens, ctx),
        Query::Or(children) => compile_assoc(children, tables, doclens, ctx, PostingNode::Or),
        Query::Xor(children) => compile_assoc(children, tables, doclens, ctx, PostingNode::Xor),
        Query::Synonym(children) => {
            let combined = compile_assoc(children, tables, doclens, ctx, PostingNode::Or)?;
            let scheme = synonym_weight(children, tables.postlist(), ctx)?;
            Ok(flatten_to_synonym(combined, scheme))
        }
        Query::AndNot(l, r) => Ok(PostingNode::AndNot(
            Box::new(compile(l, tables, doclens, ctx)?),
            Box::new(compile(r, tables, doclens, ctx)?),
        )),
        Query::AndMaybe(l, r) => Ok(PostingNode::AndMaybe(
            Box::new(compile(l, tables, doclens, ctx)?),
            Box::new(compile(r, tables, doclens, ctx)?),
        )),
        Query::Scale(inner, factor) => Ok(PostingNode::Scale(Box::new(compile(inner, tables, doclens, ctx)?), *factor)),
        Query::ValueRange { slot, lo, hi } => {
            let inner = compile_match_all(tables.postlist(), doclens, ctx)?;
            let mut node = PostingNode::ValueRange {
                inner: Box::new(inner),
                slot: *slot,
                lo: lo.clone(),
                hi: hi.clone(),
                lookup: ValueLookup::new(tables.table("record")?),
            };
            node.settle()?;
            Ok(node)
        }
        Query::Phrase(terms) => compile_positional(terms, 0, true, tables, doclens, ctx),
        Query::Near { terms, window } => compile_positional(terms, *window, false, tables, doclens, ctx),
    }
}

fn compile_term<'a, F: FileSystem>(
    text: &[u8],
    wqf: u32,
    postlist: &'a Btree<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
) -> Result<PostingNode<'a, F>> {
    let Some(reader) = PostingListReader::open(postlist, text)? else {
        return Ok(PostingNode::MatchNothing);
    };
    let weight = make_weight(ctx, reader.termfreq, wqf);
    let mut node = PostingNode::Term(LeafIterator::new(reader, weight, doclens));
    // Leaves start positioned on their first posting (Xapian
    // convention): every combinator below assumes its children are
    // already at a real docid or genuinely exhausted, never in a
    // "before the beginning" limbo state.
    node.next(0.0)?;
    Ok(node)
}

fn compile_match_all<'a, F: FileSystem>(
    postlist: &'a Btree<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
) -> Result<PostingNode<'a, F>> {
    let Some(reader) = PostingListReader::open(postlist, b"")? else {
        return Ok(PostingNode::MatchNothing);
    };
    let weight = make_weight(ctx, reader.termfreq, 1);
    let mut node = PostingNode::MatchAll(LeafIterator::new(reader, weight, doclens));
    node.next(0.0)?;
    Ok(node)
}

fn compile_assoc<'a, F: FileSystem>(
    children: &[Query],
    tables: &'a TableSet<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
    combine: impl Fn(Box<PostingNode<'a, F>>, Box<PostingNode<'a, F>>) -> PostingNode<'a, F>,
) -> Result<PostingNode<'a, F>> {
    if children.is_empty() {
        return Err(Error::InvalidArgument("associative query operator with no children".into()));
    }
    let mut iter = children.iter();
    let mut acc = compile(iter.next().expect("checked non-empty"), tables, doclens, ctx)?;
    for child in iter {
        let next = compile(child, tables, doclens, ctx)?;
        acc = combine(Box::new(acc), Box::new(next));
    }
    Ok(acc)
}

/// Folds `children` into a left-leaning AND tree, settling (forcing
/// the initial leapfrog round) after every fold step: unlike OR/XOR,
/// whose `docid()` is valid the moment both sides have a real
/// posting, AND only reports a real head once the heads agree, so an
/// intermediate AND node used as the next fold step's child must be
/// pushed past its initial "heads disagree" state before that parent
/// can read a meaningful `docid()`/`max_weight()` from it.
fn compile_and<'a, F: FileSystem>(
    children: &[Query],
    tables: &'a TableSet<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
) -> Result<PostingNode<'a, F>> {
    if children.is_empty() {
        return Err(Error::InvalidArgument("AND with no children".into()));
    }
    let mut iter = children.iter();
    let mut acc = compile(iter.next().expect("checked non-empty"), tables, doclens, ctx)?;
    for child in iter {
        let next = compile(child, tables, doclens, ctx)?;
        let mut node = PostingNode::And(Box::new(acc), Box::new(next));
        if node.at_end() {
            node.next(0.0)?;
        }
        acc = node;
    }
    Ok(acc)
}

fn synonym_weight<F: FileSystem>(children: &[Query], postlist: &Btree<F>, ctx: &QueryContext) -> Result<TermWeight> {
    // A synonym group is weighted as if it were one term whose
    // termfreq is the union's — approximated here as the max of its
    // members' termfreqs, since an exact union count would need a
    // full postlist scan up front.
    let mut termfreq = 0;
    for child in children {
        if let Query::Term { text, .. } = child {
            if let Some(reader) = PostingListReader::open(postlist, text)? {
                termfreq = termfreq.max(reader.termfreq);
            }
        }
    }
    Ok(make_weight(ctx, termfreq, 1))
}

fn flatten_to_synonym<F: FileSystem>(node: PostingNode<'_, F>, scheme: TermWeight) -> PostingNode<'_, F> {
    match node {
        PostingNode::Or(l, r) => PostingNode::Synonym(l, r, scheme),
        other => other,
    }
}

fn compile_positional<'a, F: FileSystem>(
    terms: &[Vec<u8>],
    window: u32,
    ordered: bool,
    tables: &'a TableSet<F>,
    doclens: &'a DoclenSource<'a, F>,
    ctx: &QueryContext,
) -> Result<PostingNode<'a, F>> {
    if terms.len() < 2 {
        return Err(Error::InvalidArgument("PHRASE/NEAR needs at least two terms".into()));
    }
    let children: Vec<Query> = terms.iter().map(|t| Query::term(t.clone())).collect();
    let inner = compile_and(&children, tables, doclens, ctx)?;
    let mut node = PostingNode::Positional {
        inner: Box::new(inner),
        terms: terms.to_vec(),
        window,
        ordered,
        lookup: PositionLookup::new(tables.table("position")?),
    };
    node.settle()?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::cache::BlockCache;
    use crate::config::Config;
    use crate::fs::StdFileSystem;
    use crate::postlist::writer::write_new_postlist;
    use std::sync::Arc;

    fn open_tables(dir: &tempfile::TempDir) -> TableSet<StdFileSystem> {
        let config = Config::new(dir.path()).block_size(2048);
        TableSet::<StdFileSystem>::open(dir.path(), &config, false).unwrap()
    }

    #[test]
    fn compiles_term_and_matches_nothing_for_unknown_term() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = open_tables(&dir);
        write_new_postlist(tables.postlist_mut(), b"cat", &[(1, 1), (2, 1)]).unwrap();
        write_new_postlist(tables.postlist_mut(), b"", &[(1, 3), (2, 4)]).unwrap();

        let doclens = DoclenSource::open(tables.postlist()).unwrap();
        let ctx = QueryContext {
            collection_size: 2,
            avgdl: 3.5,
            scheme: WeightingScheme::default(),
            relevance: None,
            querysize: 1,
        };

        let found = compile(&Query::term(b"cat".to_vec()), &tables, &doclens, &ctx).unwrap();
        assert!(matches!(found, PostingNode::Term(_)));

        let missing = compile(&Query::term(b"dog".to_vec()), &tables, &doclens, &ctx).unwrap();
        assert!(matches!(missing, PostingNode::MatchNothing));
    }
}
