// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block checksums.
//!
//! Grounded on the teacher crate's `checksum.rs`: a thin wrapper around
//! `xxhash-rust`'s 128-bit xxh3 so block corruption (spec §4.1's
//! "fails with ... CorruptError on checksum mismatch") is caught cheaply
//! on every read.

/// A 128-bit checksum over a block's bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u128);

impl Checksum {
    /// Wraps a raw 128-bit integer as a checksum.
    #[must_use]
    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    /// Returns the raw 128-bit integer.
    #[must_use]
    pub fn into_u128(self) -> u128 {
        self.0
    }

    /// Computes the checksum of a byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(bytes))
    }

    /// Verifies `self` (the recomputed checksum) against `expected`
    /// (the one stored on disk).
    pub fn check(self, expected: Self) -> crate::error::Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(crate::error::Error::InvalidChecksum {
                expected,
                got: self,
            })
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_deterministic() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello worle");
        assert_ne!(a, b);
    }

    #[test]
    fn check_rejects_mismatch() {
        let a = Checksum::of(b"abc");
        let b = Checksum::of(b"abd");
        assert!(a.check(b).is_err());
        assert!(a.check(a).is_ok());
    }
}
