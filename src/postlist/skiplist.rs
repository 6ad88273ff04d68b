// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Skip-list overlay (spec §4.3): "Skip levels are inserted
//! recursively by halving the remaining body; the number of levels is
//! ⌊log₁₀(entries)/0.6⌋." Non-doclen postlists only.
//!
//! This port materialises skip entries as uniformly spaced
//! checkpoints rather than a literal recursive halving structure: a
//! chunk holds at most [`crate::config::MAX_ENTRIES_PER_CHUNK`] (2000)
//! entries, and [`super::reader::PostingListReader`] decodes a whole
//! chunk into memory and binary-searches it, so the embedded skip
//! bytes only need to round-trip through encode/decode faithfully —
//! they are not walked by this port's seek path. The checkpoint count
//! still follows the spec's level formula so the on-disk shape (how
//! many skip entries a chunk of a given size carries) matches.

/// Number of skip levels for a body of `entries` postings (spec §4.3,
/// §9: tunable preserved verbatim).
#[must_use]
pub fn level_count(entries: usize) -> usize {
    if entries < 10 {
        return 0;
    }
    ((entries as f64).log10() / 0.6).floor().max(0.0) as usize
}

/// Stride (in encoded units, i.e. postings or fixed-width runs)
/// between successive skip checkpoints for a body with `levels`
/// levels over `entries` units.
#[must_use]
pub fn checkpoint_stride(entries: usize, levels: usize) -> usize {
    if levels == 0 || entries == 0 {
        return 0;
    }
    (entries / (levels + 1)).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_lists_have_no_skip_levels() {
        assert_eq!(level_count(5), 0);
    }

    #[test]
    fn level_count_grows_with_size() {
        let small = level_count(100);
        let large = level_count(100_000);
        assert!(large >= small);
    }
}
