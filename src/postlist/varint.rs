// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Varint primitives for the posting-list codec (spec §4.3, §9).
//!
//! The body format reserves one value — all-ones at the field's
//! native width — as a sentinel that introduces a fixed-width block
//! or a skip entry rather than an ordinary docid delta (spec: "the
//! sentinel value `~0` for a docid delta is never a real value
//! (docid deltas are ≥ 1)"). Everywhere else a varint is just an
//! ordinary unsigned integer.

use crate::coding::{DecodeError, EncodeError};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Sentinel docid-delta value that introduces a special block instead
/// of an ordinary posting.
pub const SENTINEL: u64 = u32::MAX as u64;

/// Writes an unsigned varint.
pub fn write_uint<W: Write>(w: &mut W, value: u64) -> Result<(), EncodeError> {
    w.write_u64_varint(value).map_err(EncodeError::Io)
}

/// Reads an unsigned varint.
pub fn read_uint<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    r.read_u64_varint().map_err(DecodeError::Io)
}

/// Reads a varint and checks whether it is the sentinel.
pub fn read_uint_or_sentinel<R: Read>(r: &mut R) -> Result<Option<u64>, DecodeError> {
    let v = read_uint(r)?;
    if v == SENTINEL {
        Ok(None)
    } else {
        Ok(Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_small_and_large_values() {
        for value in [0u64, 1, 127, 128, 16384, u32::MAX as u64 - 1, u64::MAX] {
            let mut buf = Vec::new();
            write_uint(&mut buf, value).unwrap();
            let decoded = read_uint(&mut &buf[..]).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn sentinel_is_never_a_real_docid_delta() {
        let mut buf = Vec::new();
        write_uint(&mut buf, SENTINEL).unwrap();
        assert_eq!(read_uint_or_sentinel(&mut &buf[..]).unwrap(), None);

        let mut buf = Vec::new();
        write_uint(&mut buf, 5).unwrap();
        assert_eq!(read_uint_or_sentinel(&mut &buf[..]).unwrap(), Some(5));
    }
}
