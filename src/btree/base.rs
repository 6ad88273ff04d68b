// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The B-tree base record (spec §4.2, §6): "magic, format version,
//! block size, root block number, tree level, item count, revision,
//! serialised free-list cursor". Two files, `.baseA` and `.baseB`,
//! alternate: a commit always writes the *inactive* one, fsyncs, then
//! renames it into place, so a crash mid-write leaves the other base
//! (and therefore the previous revision) intact.

use crate::block::free_list::FreeList;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::Error;
use crate::file::{self, MAGIC_BYTES};
use crate::fs::FileSystem;
use crate::version::Version;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::path::Path;

/// Which of the two alternating base files this record came from or
/// should be written to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BaseSlot {
    A,
    B,
}

impl BaseSlot {
    pub fn suffix(self) -> &'static str {
        match self {
            BaseSlot::A => "baseA",
            BaseSlot::B => "baseB",
        }
    }

    pub fn other(self) -> Self {
        match self {
            BaseSlot::A => BaseSlot::B,
            BaseSlot::B => BaseSlot::A,
        }
    }
}

/// The decoded contents of one base file.
#[derive(Clone, Debug)]
pub struct BaseRecord {
    pub version: Version,
    pub block_size: u32,
    pub root_block: u32,
    pub level: u16,
    pub item_count: u64,
    pub revision: u64,
    pub free_list: FreeList,
}

impl Encode for BaseRecord {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&MAGIC_BYTES)?;
        writer.write_u8(u8::from(self.version))?;
        writer.write_u32::<BigEndian>(self.block_size)?;
        writer.write_u32::<BigEndian>(self.root_block)?;
        writer.write_u16::<BigEndian>(self.level)?;
        writer.write_u64::<BigEndian>(self.item_count)?;
        writer.write_u64::<BigEndian>(self.revision)?;
        self.free_list.encode_into(writer)?;
        Ok(())
    }
}

impl Decode for BaseRecord {
    fn decode_from<R: Read>(reader: &mut R) -> std::result::Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidTag("base-file magic", magic[0]));
        }
        let version_byte = reader.read_u8()?;
        let version = Version::try_from(version_byte)
            .map_err(|_| DecodeError::InvalidTag("base-file version", version_byte))?;

        Ok(Self {
            version,
            block_size: reader.read_u32::<BigEndian>()?,
            root_block: reader.read_u32::<BigEndian>()?,
            level: reader.read_u16::<BigEndian>()?,
            item_count: reader.read_u64::<BigEndian>()?,
            revision: reader.read_u64::<BigEndian>()?,
            free_list: FreeList::decode_from(reader)?,
        })
    }
}

impl BaseRecord {
    /// Reads whichever base file (A, B, both, or neither) exists at
    /// `table_path` (the path without its `.baseA`/`.baseB` suffix),
    /// returning the one with the higher revision. Spec §6: "if both
    /// exist and disagree, the lower is considered half-written."
    pub fn open_active<F: FileSystem>(table_path: &Path) -> crate::error::Result<(Self, BaseSlot)> {
        let a = Self::try_read::<F>(&with_suffix(table_path, BaseSlot::A.suffix()));
        let b = Self::try_read::<F>(&with_suffix(table_path, BaseSlot::B.suffix()));

        match (a, b) {
            (Some(a), Some(b)) => {
                if a.revision >= b.revision {
                    Ok((a, BaseSlot::A))
                } else {
                    Ok((b, BaseSlot::B))
                }
            }
            (Some(a), None) => Ok((a, BaseSlot::A)),
            (None, Some(b)) => Ok((b, BaseSlot::B)),
            (None, None) => Err(Error::DatabaseOpening(format!(
                "no consistent base file for {}",
                table_path.display()
            ))),
        }
    }

    fn try_read<F: FileSystem>(path: &Path) -> Option<Self> {
        let bytes = F::read(path).ok()?;
        Self::decode_from(&mut &bytes[..]).ok()
    }

    /// Writes this record to the inactive slot and atomically renames
    /// it into place, per the two-base commit scheme.
    pub fn commit<F: FileSystem>(&self, table_path: &Path, active_slot: BaseSlot) -> crate::error::Result<()> {
        let target = with_suffix(table_path, active_slot.other().suffix());
        let bytes = self.encode_into_vec();
        file::rewrite_atomic::<F>(&target, &bytes)?;
        Ok(())
    }
}

fn with_suffix(table_path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut path = table_path.to_path_buf();
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".");
    file_name.push(suffix);
    path.set_file_name(file_name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;

    fn sample() -> BaseRecord {
        let mut free_list = FreeList::new();
        free_list.release(5, 1);
        BaseRecord {
            version: Version::V1,
            block_size: 8192,
            root_block: 1,
            level: 0,
            item_count: 2,
            revision: 3,
            free_list,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = sample();
        let bytes = record.encode_into_vec();
        let decoded = BaseRecord::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(decoded.root_block, record.root_block);
        assert_eq!(decoded.revision, record.revision);
        assert_eq!(decoded.free_list.len(), record.free_list.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 64];
        assert!(BaseRecord::decode_from(&mut &bytes[..]).is_err());
    }

    #[test]
    fn commit_then_open_picks_higher_revision() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("postlist");

        let mut record = sample();
        record.revision = 1;
        record.commit::<StdFileSystem>(&table_path, BaseSlot::B).unwrap();

        let (opened, slot) = BaseRecord::open_active::<StdFileSystem>(&table_path).unwrap();
        assert_eq!(opened.revision, 1);
        assert_eq!(slot, BaseSlot::A);

        record.revision = 2;
        record.root_block = 9;
        record.commit::<StdFileSystem>(&table_path, slot).unwrap();

        let (opened, slot) = BaseRecord::open_active::<StdFileSystem>(&table_path).unwrap();
        assert_eq!(opened.revision, 2);
        assert_eq!(opened.root_block, 9);
        assert_eq!(slot, BaseSlot::B);
    }
}
