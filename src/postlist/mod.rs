// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The posting-list codec (spec §4.3): chunked `(docid, wdf)` storage
//! over the copy-on-write B-tree, with a fixed-width block mode for
//! runs of consecutive docids and an optional skip-list overlay.

pub mod chunk;
pub mod fixedblock;
pub mod reader;
pub mod skiplist;
pub mod varint;
pub mod writer;

pub use chunk::{Chunk, FirstChunkCounters, Posting};
pub use reader::PostingListReader;
