// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Composite key encoding for posting-list keys (spec §4.2, §4.3):
//! `<len-byte><term-bytes><encoded-docid>`, where the docid is encoded
//! so that byte-lexicographic order on the whole key matches
//! `(term, docid)` order.
//!
//! A docid is encoded length-prefixed, most-significant byte first, so
//! that a numerically larger docid always sorts after a smaller one
//! *and* a longer encoding always sorts after a shorter one of the
//! same leading bytes (the length prefix itself guarantees this: two
//! encodings of different byte-length never collide in their leading
//! byte because the prefix is a valid length marker, not part of the
//! big-endian value).

use crate::error::{Error, Result};

/// Maximum term length (spec §3: "length ≤ 245").
pub const MAX_TERM_LEN: usize = 245;

/// Encodes a docid so that encoded order matches numeric order.
///
/// Layout: one length byte `n` (1..=4), followed by the `n`
/// minimal big-endian bytes of `docid`.
pub fn encode_docid(docid: u32) -> Vec<u8> {
    let be = docid.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(3);
    let trimmed = &be[first_nonzero..];
    let mut out = Vec::with_capacity(trimmed.len() + 1);
    out.push(trimmed.len() as u8);
    out.extend_from_slice(trimmed);
    out
}

/// Decodes a docid previously produced by [`encode_docid`], returning
/// the docid and the number of bytes consumed.
pub fn decode_docid(bytes: &[u8]) -> Result<(u32, usize)> {
    let len = *bytes.first().ok_or_else(|| {
        Error::DatabaseCorrupt {
            table: "btree-key",
            detail: "truncated docid encoding".into(),
        }
    })? as usize;
    if len == 0 || len > 4 || bytes.len() < 1 + len {
        return Err(Error::DatabaseCorrupt {
            table: "btree-key",
            detail: format!("invalid docid length prefix {len}"),
        });
    }
    let mut buf = [0u8; 4];
    buf[4 - len..].copy_from_slice(&bytes[1..1 + len]);
    Ok((u32::from_be_bytes(buf), 1 + len))
}

/// Builds the key for the first chunk of a term's posting list:
/// `<len-byte><term-bytes>`.
pub fn first_chunk_key(term: &[u8]) -> Result<Vec<u8>> {
    if term.len() > MAX_TERM_LEN {
        return Err(Error::InvalidArgument(format!(
            "term length {} exceeds {}",
            term.len(),
            MAX_TERM_LEN
        )));
    }
    let mut key = Vec::with_capacity(term.len() + 1);
    key.push(term.len() as u8);
    key.extend_from_slice(term);
    Ok(key)
}

/// Builds the key for a non-first chunk:
/// `<len-byte><term-bytes><encoded-first-docid>`.
pub fn chunk_key(term: &[u8], first_docid: u32) -> Result<Vec<u8>> {
    let mut key = first_chunk_key(term)?;
    key.extend(encode_docid(first_docid));
    Ok(key)
}

/// Splits a posting-list key back into `(term, Some(first_docid))`, or
/// `(term, None)` if it is a first-chunk key.
pub fn decode_chunk_key(key: &[u8]) -> Result<(&[u8], Option<u32>)> {
    let term_len = *key.first().ok_or_else(|| Error::DatabaseCorrupt {
        table: "btree-key",
        detail: "empty key".into(),
    })? as usize;
    if key.len() < 1 + term_len {
        return Err(Error::DatabaseCorrupt {
            table: "btree-key",
            detail: "key shorter than its term-length prefix".into(),
        });
    }
    let term = &key[1..1 + term_len];
    let rest = &key[1 + term_len..];
    if rest.is_empty() {
        Ok((term, None))
    } else {
        let (docid, _) = decode_docid(rest)?;
        Ok((term, Some(docid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docid_roundtrip() {
        for docid in [1u32, 255, 256, 65535, 65536, u32::MAX] {
            let encoded = encode_docid(docid);
            let (decoded, used) = decode_docid(&encoded).unwrap();
            assert_eq!(decoded, docid);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn docid_order_preserved() {
        let mut docids = vec![1u32, 5, 254, 255, 256, 1000, 70000, u32::MAX];
        let mut encoded: Vec<Vec<u8>> = docids.iter().map(|&d| encode_docid(d)).collect();
        docids.sort_unstable();
        encoded.sort();
        let decoded: Vec<u32> = encoded
            .iter()
            .map(|bytes| decode_docid(bytes).unwrap().0)
            .collect();
        assert_eq!(decoded, docids);
    }

    #[test]
    fn chunk_keys_sort_by_term_then_docid() {
        let a = first_chunk_key(b"cat").unwrap();
        let b = chunk_key(b"cat", 5).unwrap();
        let c = chunk_key(b"cat", 500).unwrap();
        let d = first_chunk_key(b"dog").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn rejects_oversized_term() {
        let term = vec![b'x'; MAX_TERM_LEN + 1];
        assert!(first_chunk_key(&term).is_err());
    }
}
