// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width block mode (spec §4.3): a run of consecutive docids
//! with delta 1 encoded as `(first_delta, count N, byte-width B, N*B
//! bytes)` rather than as N separate `(delta, wdf)` pairs. Worth
//! emitting only when the run is long enough and the fixed width
//! doesn't waste too many bytes relative to what each wdf actually
//! needs (spec §9's preserved tunables: minimum run length 5, minimum
//! good-bytes ratio 0.8).

use crate::coding::{DecodeError, EncodeError};
use crate::config::{MIN_CONTIGUOUS_RUN, MIN_GOOD_BYTES_RATIO};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Minimal number of bytes needed to hold `value` in a little-endian
/// fixed-width field.
#[must_use]
pub fn bytes_needed(value: u32) -> u8 {
    if value <= 0xFF {
        1
    } else if value <= 0xFFFF {
        2
    } else if value <= 0x00FF_FFFF {
        3
    } else {
        4
    }
}

/// Decides whether `wdfs` (the wdfs of a run of consecutive docids)
/// is worth encoding as a fixed-width block, returning the byte width
/// to use if so.
#[must_use]
pub fn evaluate_run(wdfs: &[u32]) -> Option<u8> {
    if wdfs.len() < MIN_CONTIGUOUS_RUN {
        return None;
    }
    let width = wdfs.iter().copied().map(bytes_needed).max().unwrap_or(1);
    let good_bytes: u64 = wdfs.iter().copied().map(|w| u64::from(bytes_needed(w))).sum();
    let used_bytes = u64::from(width) * wdfs.len() as u64;
    if (good_bytes as f64 / used_bytes as f64) >= MIN_GOOD_BYTES_RATIO {
        Some(width)
    } else {
        None
    }
}

/// Encodes a fixed-width block body (everything after the sentinel
/// varint and tag byte have already been written by the caller):
/// `varint(first_delta)`, `u16 count`, `u8 byte_width`, then `count`
/// values of `byte_width` little-endian bytes each.
pub fn encode<W: Write>(
    w: &mut W,
    first_delta: u64,
    byte_width: u8,
    wdfs: &[u32],
) -> Result<(), EncodeError> {
    super::varint::write_uint(w, first_delta)?;
    w.write_u16::<BigEndian>(wdfs.len() as u16)?;
    w.write_u8(byte_width)?;
    for &wdf in wdfs {
        let bytes = wdf.to_le_bytes();
        w.write_all(&bytes[..byte_width as usize])?;
    }
    Ok(())
}

/// Decodes a fixed-width block body (the sentinel and tag have
/// already been consumed by the caller). Returns the delta to the
/// run's first docid and the decoded wdfs.
pub fn decode<R: Read>(r: &mut R) -> Result<(u64, Vec<u32>), DecodeError> {
    let first_delta = super::varint::read_uint(r)?;
    let count = r.read_u16::<BigEndian>()?;
    let byte_width = r.read_u8()?;
    if byte_width == 0 || byte_width > 4 {
        return Err(DecodeError::InvalidTag("fixed-block byte-width", byte_width));
    }
    let mut wdfs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut bytes = [0u8; 4];
        r.read_exact(&mut bytes[..byte_width as usize])?;
        wdfs.push(u32::from_le_bytes(bytes));
    }
    Ok((first_delta, wdfs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_run_is_worth_it() {
        let wdfs = vec![1u32; 20];
        assert_eq!(evaluate_run(&wdfs), Some(1));
    }

    #[test]
    fn short_run_is_not_worth_it() {
        let wdfs = vec![1u32; 3];
        assert_eq!(evaluate_run(&wdfs), None);
    }

    #[test]
    fn wasteful_width_is_not_worth_it() {
        // One huge outlier forces a 4-byte width for what is mostly
        // 1-byte data; good-bytes ratio drops below 0.8.
        let mut wdfs = vec![1u32; 20];
        wdfs[0] = 1_000_000;
        assert_eq!(evaluate_run(&wdfs), None);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let wdfs = vec![1u32, 2, 300, 4, 5, 6];
        let width = evaluate_run(&wdfs).unwrap_or(2);
        let mut buf = Vec::new();
        encode(&mut buf, 7, width, &wdfs).unwrap();

        let (delta, decoded) = decode(&mut &buf[..]).unwrap();
        assert_eq!(delta, 7);
        assert_eq!(decoded, wdfs);
    }
}
