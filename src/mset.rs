// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The match set (spec §4.5, §6): the result of running a query
//! through [`crate::query::matcher`], plus the wire format a remote
//! sub-database's partial result would be serialised as before being
//! merged into the aggregate (spec §4.6).
//!
//! Grounded on the original engine's `MSet`/`MSetItem` pair: this port
//! keeps the same flat `items` vector plus cardinality-bound fields
//! rather than the original's lazily-fetched-document back-pointer
//! (design notes' cyclic-reference note: "copy the needed subset
//! upfront rather than retaining a handle into the engine").

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::postlist::varint;
use crate::query::collector::{Match, MatchResults};
use std::io::{Read, Write};

/// One ranked result (spec §6: "(docid, weight, collapse_key,
/// collapse_count)").
#[derive(Clone, Debug, PartialEq)]
pub struct MSetItem {
    pub docid: u32,
    pub weight: f64,
    pub collapse_key: Option<Vec<u8>>,
    pub collapse_count: u32,
}

impl From<Match> for MSetItem {
    fn from(m: Match) -> Self {
        Self {
            docid: m.docid,
            weight: m.weight,
            collapse_key: m.collapse_key,
            collapse_count: m.collapse_count,
        }
    }
}

/// A query's result set, with cardinality bounds (spec §4.5/§6).
#[derive(Clone, Debug, Default)]
pub struct MSet {
    pub firstitem: u32,
    pub matches_lower_bound: u32,
    pub matches_estimated: u32,
    pub matches_upper_bound: u32,
    pub max_possible: f64,
    pub max_attained: f64,
    pub items: Vec<MSetItem>,
}

impl MSet {
    #[must_use]
    pub fn from_results(firstitem: u32, results: MatchResults) -> Self {
        Self {
            firstitem,
            matches_lower_bound: results.matches_lower_bound,
            matches_estimated: results.matches_estimated,
            matches_upper_bound: results.matches_upper_bound,
            max_possible: results.max_possible,
            max_attained: results.max_attained,
            items: results.matches.into_iter().map(MSetItem::from).collect(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merges `others` (each already individually truncated/ranked) by
    /// re-sorting their concatenated items on weight descending, docid
    /// ascending, and summing cardinality bounds (spec §4.6: "MSet
    /// aggregation interleaves sub-results by the same weight heap").
    #[must_use]
    pub fn merge(mut self, others: impl IntoIterator<Item = MSet>) -> Self {
        for other in others {
            self.matches_lower_bound += other.matches_lower_bound;
            self.matches_estimated += other.matches_estimated;
            self.matches_upper_bound += other.matches_upper_bound;
            self.max_possible = self.max_possible.max(other.max_possible);
            self.max_attained = self.max_attained.max(other.max_attained);
            self.items.extend(other.items);
        }
        self.items.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.docid.cmp(&b.docid))
        });
        self
    }
}

impl Encode for MSetItem {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        varint::write_uint(writer, u64::from(self.docid))?;
        writer.write_all(&self.weight.to_le_bytes())?;
        match &self.collapse_key {
            Some(key) => {
                varint::write_uint(writer, key.len() as u64 + 1)?;
                writer.write_all(key)?;
            }
            None => varint::write_uint(writer, 0)?,
        }
        varint::write_uint(writer, u64::from(self.collapse_count))?;
        Ok(())
    }
}

impl Decode for MSetItem {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let docid = varint::read_uint(reader)? as u32;
        let mut weight_bytes = [0u8; 8];
        reader.read_exact(&mut weight_bytes)?;
        let weight = f64::from_le_bytes(weight_bytes);
        let marker = varint::read_uint(reader)?;
        let collapse_key = if marker == 0 {
            None
        } else {
            let mut key = vec![0u8; (marker - 1) as usize];
            reader.read_exact(&mut key)?;
            Some(key)
        };
        let collapse_count = varint::read_uint(reader)? as u32;
        Ok(Self { docid, weight, collapse_key, collapse_count })
    }
}

impl Encode for MSet {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        varint::write_uint(writer, u64::from(self.firstitem))?;
        varint::write_uint(writer, u64::from(self.matches_lower_bound))?;
        varint::write_uint(writer, u64::from(self.matches_estimated))?;
        varint::write_uint(writer, u64::from(self.matches_upper_bound))?;
        writer.write_all(&self.max_possible.to_le_bytes())?;
        writer.write_all(&self.max_attained.to_le_bytes())?;
        varint::write_uint(writer, self.items.len() as u64)?;
        for item in &self.items {
            item.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for MSet {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let firstitem = varint::read_uint(reader)? as u32;
        let matches_lower_bound = varint::read_uint(reader)? as u32;
        let matches_estimated = varint::read_uint(reader)? as u32;
        let matches_upper_bound = varint::read_uint(reader)? as u32;
        let mut f64_bytes = [0u8; 8];
        reader.read_exact(&mut f64_bytes)?;
        let max_possible = f64::from_le_bytes(f64_bytes);
        reader.read_exact(&mut f64_bytes)?;
        let max_attained = f64::from_le_bytes(f64_bytes);
        let count = varint::read_uint(reader)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(MSetItem::decode_from(reader)?);
        }
        Ok(Self {
            firstitem,
            matches_lower_bound,
            matches_estimated,
            matches_upper_bound,
            max_possible,
            max_attained,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(docid: u32, weight: f64) -> MSetItem {
        MSetItem { docid, weight, collapse_key: Some(b"k".to_vec()), collapse_count: 2 }
    }

    #[test]
    fn mset_item_roundtrip() {
        let original = item(42, 3.5);
        let bytes = original.encode_into_vec();
        let mut cursor = bytes.as_slice();
        let decoded = MSetItem::decode_from(&mut cursor).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn mset_roundtrip() {
        let original = MSet {
            firstitem: 0,
            matches_lower_bound: 1,
            matches_estimated: 2,
            matches_upper_bound: 3,
            max_possible: 9.0,
            max_attained: 8.0,
            items: vec![item(1, 5.0), item(2, 4.0)],
        };
        let bytes = original.encode_into_vec();
        let mut cursor = bytes.as_slice();
        let decoded = MSet::decode_from(&mut cursor).unwrap();
        assert_eq!(decoded.items, original.items);
        assert_eq!(decoded.matches_estimated, original.matches_estimated);
    }

    #[test]
    fn merge_sorts_by_weight_descending() {
        let a = MSet { items: vec![item(1, 1.0), item(2, 5.0)], ..Default::default() };
        let b = MSet { items: vec![item(3, 3.0)], ..Default::default() };
        let merged = a.merge([b]);
        let docids: Vec<u32> = merged.items.iter().map(|i| i.docid).collect();
        assert_eq!(docids, vec![2, 3, 1]);
    }
}
