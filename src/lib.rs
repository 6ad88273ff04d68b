// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The storage and query core of a probabilistic full-text search
//! engine: a copy-on-write B-tree over a fixed-block store, a chunked
//! posting-list codec with a skip-list overlay, an inverter that
//! buffers edits between commits, and a matcher that evaluates
//! Boolean/ranked query trees under BM25 or Trad weighting.
//!
//! This crate implements the storage engine only (see the module
//! layout below) — query-string parsing, stemming, the client-facing
//! error hierarchy's presentation, and the network/remote backend are
//! all out of scope and treated as external collaborators.
//!
//! # Example
//!
//! ```
//! use sondage_core::database::{NewDocument, WritableDatabase};
//! use sondage_core::config::Config;
//! use sondage_core::query::{Query, WeightingScheme};
//! use sondage_core::query::collector::CollectorSpec;
//!
//! # fn main() -> sondage_core::error::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let config = Config::new(dir.path());
//! let mut db = WritableDatabase::create_or_open(config)?;
//!
//! let mut doc = NewDocument::default();
//! doc.add_term("cat", 2);
//! doc.add_term("sat", 1);
//! let docid = db.add_document(doc)?;
//! db.commit()?;
//!
//! let reader = db.reader();
//! assert_eq!(reader.get_doclength(docid)?, 3);
//! assert_eq!(reader.get_termfreq(b"cat")?, 1);
//!
//! let mset = reader.enquire(
//!     &Query::term("cat"),
//!     WeightingScheme::default(),
//!     None,
//!     &CollectorSpec::default(),
//! )?;
//! assert_eq!(mset.items.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod block;
pub mod btree;
pub mod checksum;
pub mod coding;
pub mod config;
pub mod database;
pub mod error;
pub mod file;
pub mod fs;
pub mod inverter;
pub mod mset;
pub mod position;
pub mod postlist;
pub mod query;
pub mod record;
pub mod table;
pub mod termlist;
pub mod version;

pub use config::Config;
pub use database::{Database, MultiDatabase, WritableDatabase};
pub use error::{Error, Result};
pub use mset::{MSet, MSetItem};
pub use query::{Query, WeightingScheme};
