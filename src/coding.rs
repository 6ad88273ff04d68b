// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Serialisation primitives shared by the block store, B-tree nodes,
//! and posting-list codec. Grounded on the teacher crate's
//! `coding.rs` (the `Encode`/`Decode` trait pair), generalised with the
//! corrupt-data variants the posting-list reader needs (spec §4.3:
//! "overflow on varint decode or reading past end throws CorruptError
//! with position").

use std::io::{Read, Write};

/// Error during serialisation. Infallible in practice (writers are
/// `Vec<u8>` or files), kept as a type so `Encode` can be used over
/// any `Write`.
#[derive(Debug)]
pub enum EncodeError {
    /// Underlying I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error during deserialisation.
#[derive(Debug)]
pub enum DecodeError {
    /// Underlying I/O error (including short reads / unexpected EOF).
    Io(std::io::Error),

    /// A tag byte did not correspond to a known variant, along with
    /// the name of the field and the offending byte.
    InvalidTag(&'static str, u8),

    /// A varint decoded to a value wider than its target integer type.
    VarintOverflow(&'static str),

    /// Reading past the end of a chunk/block body.
    UnexpectedEof(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "decode error: {e}"),
            Self::InvalidTag(field, tag) => write!(f, "invalid tag for {field}: {tag}"),
            Self::VarintOverflow(field) => write!(f, "varint overflow decoding {field}"),
            Self::UnexpectedEof(where_) => write!(f, "unexpected end of data in {where_}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Trait for serialising a value into a byte stream.
pub trait Encode {
    /// Serialises into a writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serialises into a fresh vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        // Writing into a `Vec<u8>` cannot fail.
        self.encode_into(&mut v).expect("cannot fail");
        v
    }
}

/// Trait for deserialising a value from a byte stream.
pub trait Decode {
    /// Deserialises from a reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}
