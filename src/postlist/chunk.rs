// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Posting-list chunk codec (spec §4.3): one B-tree value holding a
//! contiguous slice of a term's (docid, wdf) pairs, in either
//! variable-byte delta mode or a fixed-width block mode for runs of
//! consecutive docids, with an optional skip-list overlay.
//!
//! Body entry tag byte (written immediately after the sentinel
//! varint; see the module doc comment on disambiguating fixed-width
//! blocks from skip entries, both of which are introduced by the same
//! sentinel):

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::postlist::{fixedblock, skiplist, varint};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Tag following the sentinel that introduces a skip entry.
const TAG_SKIP: u8 = 0;
/// Tag following the sentinel that introduces a fixed-width block.
const TAG_FIXED_BLOCK: u8 = 1;

/// One decoded `(docid, wdf)` pair. For the doclen postlist (empty
/// term) `wdf` holds the document length instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Posting {
    pub docid: u32,
    pub wdf: u32,
}

/// Per-term counters carried only by the first chunk of a posting
/// list (spec §4.3: "First chunk only: varint(termfreq),
/// varint(collfreq)...").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FirstChunkCounters {
    pub termfreq: u32,
    pub collfreq: u32,
}

/// A single decoded chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Counters, present only for the first chunk of a term.
    pub counters: Option<FirstChunkCounters>,
    /// First docid covered by this chunk.
    pub first_docid: u32,
    /// Last docid covered by this chunk.
    pub last_docid: u32,
    /// Whether this is the last chunk for the term.
    pub is_last_chunk: bool,
    /// Every posting in the chunk, ascending by docid.
    pub postings: Vec<Posting>,
}

impl Chunk {
    /// Encodes this chunk's value bytes. Whether to materialise a
    /// skip-list overlay is controlled by `with_skips` (spec §4.3:
    /// doclen postlists never carry skip entries).
    pub fn encode(&self, with_skips: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(counters) = self.counters {
            varint::write_uint(&mut buf, u64::from(counters.termfreq)).expect("vec write");
            varint::write_uint(&mut buf, u64::from(counters.collfreq)).expect("vec write");
            varint::write_uint(&mut buf, u64::from(self.first_docid - 1)).expect("vec write");
        }
        buf.write_u8(u8::from(self.is_last_chunk)).expect("vec write");
        varint::write_uint(&mut buf, u64::from(self.last_docid - self.first_docid))
            .expect("vec write");

        encode_body(&mut buf, self.first_docid - 1, &self.postings, with_skips);
        buf
    }

    /// Decodes a chunk's value bytes. `first_docid_from_key` must be
    /// supplied for non-first chunks (their first docid lives in the
    /// B-tree key, not the value); pass `None` only for the first
    /// chunk of a term.
    pub fn decode(bytes: &[u8], first_docid_from_key: Option<u32>) -> crate::error::Result<Self> {
        let mut cursor = bytes;

        let (counters, first_docid) = if let Some(first_docid) = first_docid_from_key {
            (None, first_docid)
        } else {
            let termfreq = varint::read_uint(&mut cursor).map_err(decode_err)? as u32;
            let collfreq = varint::read_uint(&mut cursor).map_err(decode_err)? as u32;
            let first_docid_minus_one = varint::read_uint(&mut cursor).map_err(decode_err)? as u32;
            (
                Some(FirstChunkCounters { termfreq, collfreq }),
                first_docid_minus_one + 1,
            )
        };

        let is_last_chunk = cursor.read_u8().map_err(|e| decode_err(DecodeError::Io(e)))? != 0;
        let last_delta = varint::read_uint(&mut cursor).map_err(decode_err)? as u32;
        let last_docid = first_docid + last_delta;

        let postings = decode_body(cursor, first_docid - 1, last_docid)?;

        Ok(Self {
            counters,
            first_docid,
            last_docid,
            is_last_chunk,
            postings,
        })
    }
}

fn decode_err(e: DecodeError) -> crate::error::Error {
    crate::error::Error::DatabaseCorrupt {
        table: "postlist",
        detail: e.to_string(),
    }
}

/// One unit of body content: either a single posting in delta mode,
/// or a run of consecutive-docid postings in fixed-width mode.
enum BodyUnit {
    Single(Posting),
    Run { first_docid: u32, wdfs: Vec<u32>, byte_width: u8 },
}

impl BodyUnit {
    fn last_docid(&self) -> u32 {
        match self {
            BodyUnit::Single(p) => p.docid,
            BodyUnit::Run { first_docid, wdfs, .. } => first_docid + wdfs.len() as u32 - 1,
        }
    }
}

/// Groups postings into delta-mode singles and fixed-width-mode runs
/// (spec §4.3: emitted "only when (a) a run of consecutive docids of
/// length ≥ 5 is seen and (b) the average good bytes / used bytes
/// ratio stays ≥ 0.8").
fn plan_units(postings: &[Posting]) -> Vec<BodyUnit> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < postings.len() {
        let mut run_len = 1;
        while i + run_len < postings.len()
            && postings[i + run_len].docid == postings[i + run_len - 1].docid + 1
        {
            run_len += 1;
        }
        let wdfs: Vec<u32> = postings[i..i + run_len].iter().map(|p| p.wdf).collect();
        if let Some(byte_width) = fixedblock::evaluate_run(&wdfs) {
            units.push(BodyUnit::Run {
                first_docid: postings[i].docid,
                wdfs,
                byte_width,
            });
            i += run_len;
        } else {
            units.push(BodyUnit::Single(postings[i]));
            i += 1;
        }
    }
    units
}

fn encode_body(buf: &mut Vec<u8>, base_prev: u32, postings: &[Posting], with_skips: bool) {
    let units = plan_units(postings);
    let levels = if with_skips { skiplist::level_count(units.len()) } else { 0 };
    let stride = skiplist::checkpoint_stride(units.len(), levels);

    let mut prev = base_prev;
    for (idx, unit) in units.iter().enumerate() {
        if stride > 0 && idx > 0 && idx % stride == 0 {
            // Distance, in units, to the next checkpoint (or the end
            // of the body); kept informational, see module doc.
            let remaining = (units.len() - idx).min(stride) as u32;
            varint::write_uint(buf, varint::SENTINEL).expect("vec write");
            buf.write_u8(TAG_SKIP).expect("vec write");
            buf.write_u32::<BigEndian>(remaining).expect("vec write");
            let target_docid = unit_first_docid(unit);
            varint::write_uint(buf, u64::from(target_docid - prev)).expect("vec write");
        }

        match unit {
            BodyUnit::Single(p) => {
                varint::write_uint(buf, u64::from(p.docid - prev)).expect("vec write");
                varint::write_uint(buf, u64::from(p.wdf)).expect("vec write");
            }
            BodyUnit::Run { first_docid, wdfs, byte_width } => {
                varint::write_uint(buf, varint::SENTINEL).expect("vec write");
                buf.write_u8(TAG_FIXED_BLOCK).expect("vec write");
                fixedblock::encode(buf, u64::from(first_docid - prev), *byte_width, wdfs)
                    .expect("vec write");
            }
        }
        prev = unit.last_docid();
    }
}

fn unit_first_docid(unit: &BodyUnit) -> u32 {
    match unit {
        BodyUnit::Single(p) => p.docid,
        BodyUnit::Run { first_docid, .. } => *first_docid,
    }
}

fn decode_body(mut cursor: &[u8], base_prev: u32, last_docid: u32) -> crate::error::Result<Vec<Posting>> {
    let mut postings = Vec::new();
    let mut prev = base_prev;

    while !cursor.is_empty() {
        if let Some(last) = postings.last() {
            let last: &Posting = last;
            if last.docid == last_docid {
                break;
            }
        } else if prev == last_docid {
            break;
        }

        let tag_value = varint::read_uint_or_sentinel(&mut cursor).map_err(decode_err)?;
        match tag_value {
            Some(delta) => {
                let docid = prev
                    .checked_add(delta as u32)
                    .ok_or_else(|| crate::error::Error::DatabaseCorrupt {
                        table: "postlist",
                        detail: "docid overflow while decoding chunk body".into(),
                    })?;
                let wdf = varint::read_uint(&mut cursor).map_err(decode_err)? as u32;
                postings.push(Posting { docid, wdf });
                prev = docid;
            }
            None => {
                let tag = cursor
                    .read_u8()
                    .map_err(|e| decode_err(DecodeError::Io(e)))?;
                match tag {
                    TAG_SKIP => {
                        let _offset = cursor
                            .read_u32::<BigEndian>()
                            .map_err(|e| decode_err(DecodeError::Io(e)))?;
                        let delta = varint::read_uint(&mut cursor).map_err(decode_err)?;
                        // Skip entries are not postings; this port's
                        // reader materialises the whole chunk and
                        // binary-searches it, so the jump distance is
                        // not followed — only the framing is parsed.
                        let _ = prev.checked_add(delta as u32);
                    }
                    TAG_FIXED_BLOCK => {
                        let (delta, wdfs) = fixedblock::decode(&mut cursor).map_err(decode_err)?;
                        let first_docid = prev
                            .checked_add(delta as u32)
                            .ok_or_else(|| crate::error::Error::DatabaseCorrupt {
                                table: "postlist",
                                detail: "docid overflow in fixed-width block".into(),
                            })?;
                        for (i, wdf) in wdfs.iter().enumerate() {
                            postings.push(Posting {
                                docid: first_docid + i as u32,
                                wdf: *wdf,
                            });
                        }
                        prev = first_docid + wdfs.len() as u32 - 1;
                    }
                    other => {
                        return Err(crate::error::Error::DatabaseCorrupt {
                            table: "postlist",
                            detail: format!("unknown body tag byte {other}"),
                        });
                    }
                }
            }
        }
    }

    Ok(postings)
}

impl Encode for Posting {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(self.docid)?;
        writer.write_u32::<BigEndian>(self.wdf)?;
        Ok(())
    }
}

impl Decode for Posting {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            docid: reader.read_u32::<BigEndian>()?,
            wdf: reader.read_u32::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postings(pairs: &[(u32, u32)]) -> Vec<Posting> {
        pairs.iter().map(|&(docid, wdf)| Posting { docid, wdf }).collect()
    }

    #[test]
    fn single_chunk_roundtrip_delta_mode() {
        let chunk = Chunk {
            counters: Some(FirstChunkCounters { termfreq: 3, collfreq: 6 }),
            first_docid: 1,
            last_docid: 5,
            is_last_chunk: true,
            postings: postings(&[(1, 2), (3, 1), (5, 3)]),
        };

        let bytes = chunk.encode(true);
        let decoded = Chunk::decode(&bytes, None).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn non_first_chunk_roundtrip() {
        let chunk = Chunk {
            counters: None,
            first_docid: 100,
            last_docid: 110,
            is_last_chunk: false,
            postings: postings(&[(100, 1), (105, 2), (110, 1)]),
        };

        let bytes = chunk.encode(true);
        let decoded = Chunk::decode(&bytes, Some(100)).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn consecutive_run_uses_fixed_width_block() {
        let run: Vec<Posting> = (10u32..=25).map(|d| Posting { docid: d, wdf: 1 }).collect();
        let chunk = Chunk {
            counters: Some(FirstChunkCounters { termfreq: 16, collfreq: 16 }),
            first_docid: 10,
            last_docid: 25,
            is_last_chunk: true,
            postings: run.clone(),
        };

        let units = plan_units(&run);
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0], BodyUnit::Run { .. }));

        let bytes = chunk.encode(true);
        let decoded = Chunk::decode(&bytes, None).unwrap();
        assert_eq!(decoded.postings, run);
    }

    #[test]
    fn mixed_run_and_delta_roundtrip() {
        let mut list = vec![Posting { docid: 1, wdf: 5 }];
        for d in 10u32..=20 {
            list.push(Posting { docid: d, wdf: 2 });
        }
        list.push(Posting { docid: 50, wdf: 9 });

        let chunk = Chunk {
            counters: Some(FirstChunkCounters {
                termfreq: list.len() as u32,
                collfreq: list.iter().map(|p| p.wdf).sum(),
            }),
            first_docid: list.first().unwrap().docid,
            last_docid: list.last().unwrap().docid,
            is_last_chunk: true,
            postings: list.clone(),
        };

        let bytes = chunk.encode(true);
        let decoded = Chunk::decode(&bytes, None).unwrap();
        assert_eq!(decoded.postings, list);
    }

    #[test]
    fn truncated_fixed_block_reports_database_corrupt() {
        // A well-formed header claiming a fixed-width block follows,
        // but the body is cut off before the promised bytes exist.
        let mut buf = Vec::new();
        buf.write_u8(1).unwrap(); // is_last_chunk
        varint::write_uint(&mut buf, 9).unwrap(); // last_docid - first_docid
        varint::write_uint(&mut buf, varint::SENTINEL).unwrap();
        buf.write_u8(TAG_FIXED_BLOCK).unwrap();
        varint::write_uint(&mut buf, 1).unwrap(); // first_delta
        buf.write_u16::<BigEndian>(50).unwrap(); // claims 50 entries
        buf.write_u8(1).unwrap(); // byte width 1
        // no value bytes follow: truncated

        assert!(Chunk::decode(&buf, Some(1)).is_err());
    }
}
