// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::checksum::Checksum;
use crate::version::Version;

/// Error kinds produced by the storage core.
///
/// These mirror the kinds a caller needs to branch on (see the error
/// taxonomy in the design notes), not the exception hierarchy of the
/// system this crate's on-disk format is inspired by: there is one flat
/// enum instead of a tree of exception types, and IO/parse failures are
/// ordinary values instead of unwinding.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying file system.
    Io(std::io::Error),

    /// A caller-supplied value was out of range (term too long, docid
    /// zero, unknown value slot, sort-bands > 1, ...).
    InvalidArgument(String),

    /// The operation is not allowed in the handle's current state
    /// (e.g. a write on a read-only handle).
    InvalidOperation(String),

    /// The database directory could not be opened (missing, permission
    /// denied, or an incompatible marker file).
    DatabaseOpening(String),

    /// The marker file's magic matched but the format version did not.
    DatabaseVersion {
        /// Version found on disk.
        found: Version,
    },

    /// A self-consistency check failed: missing root, bad varint,
    /// checksum mismatch, chunk docid ordering violated, and so on.
    DatabaseCorrupt {
        /// Name of the table the inconsistency was found in.
        table: &'static str,
        /// Human-readable detail, optionally naming a block number or
        /// byte offset.
        detail: String,
    },

    /// Checksum mismatch while reading a block.
    InvalidChecksum {
        /// Checksum recorded in the block trailer.
        expected: Checksum,
        /// Checksum recomputed over the block's bytes.
        got: Checksum,
    },

    /// Another writer already holds the directory lock.
    DatabaseLock,

    /// A reader's revision was recycled out from under it; the caller
    /// must reopen the table (or the whole database) to continue.
    DatabaseModified,

    /// The requested docid does not exist.
    DocNotFound(u32),

    /// An index or slot number was out of range.
    RangeError(String),

    /// Remote/RPC boundary error. The transport itself is out of scope
    /// for this crate, but the error variant is kept so an
    /// `ErrorHandler` at the matcher boundary has something to see.
    NetworkError(String),

    /// A long-running operation (match, flush) exceeded its deadline
    /// or was cancelled via a cancellation token.
    Timeout,

    /// A deprecated or not-yet-implemented feature was invoked
    /// (e.g. sort-bands > 1).
    Unimplemented(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            Self::InvalidOperation(s) => write!(f, "invalid operation: {s}"),
            Self::DatabaseOpening(s) => write!(f, "could not open database: {s}"),
            Self::DatabaseVersion { found } => {
                write!(f, "unsupported database format version: {found}")
            }
            Self::DatabaseCorrupt { table, detail } => {
                write!(f, "database corrupt in table {table:?}: {detail}")
            }
            Self::InvalidChecksum { expected, got } => {
                write!(f, "checksum mismatch: expected {expected}, got {got}")
            }
            Self::DatabaseLock => write!(f, "database is locked by another writer"),
            Self::DatabaseModified => {
                write!(f, "database was modified; reopen the table to continue")
            }
            Self::DocNotFound(did) => write!(f, "document {did} not found"),
            Self::RangeError(s) => write!(f, "index out of range: {s}"),
            Self::NetworkError(s) => write!(f, "network error: {s}"),
            Self::Timeout => write!(f, "operation timed out or was cancelled"),
            Self::Unimplemented(s) => write!(f, "not implemented: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Result type used throughout the storage core.
pub type Result<T> = std::result::Result<T, Error>;
