// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The copy-on-write B-tree (spec §4.2): sorted `(key, value)` storage
//! with point lookup, ordered cursor, insert, delete, and revisioned
//! atomic commit via two alternating base files.

pub mod base;
pub mod cursor;
pub mod key;
pub mod node;
pub mod tree;

pub use base::{BaseRecord, BaseSlot};
pub use cursor::Cursor;
pub use node::{Item, ItemValue, Node};
pub use tree::Btree;
