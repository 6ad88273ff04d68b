// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `sondage-metadata`: user-metadata CLI (spec §6:
//! "`xapian-metadata get|list|set`").

use clap::{Parser, Subcommand};
use sondage_core::fs::StdFileSystem;
use sondage_core::{Config, Database, WritableDatabase};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sondage-metadata")]
struct Cli {
    /// Database directory.
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value for `key`, or nothing if it is unset.
    Get { key: String },
    /// List every metadata key currently set, one per line.
    List,
    /// Set `key` to `value`; an empty value deletes the key.
    Set { key: String, value: String },
}

fn main() -> ExitCode {
    let _ = env_logger::try_init();
    let cli = Cli::parse();
    let config = Config::new(&cli.db);

    let result = match cli.command {
        Command::Get { key } => Database::<StdFileSystem>::open(config).and_then(|db| {
            match db.get_metadata(key.as_bytes())? {
                Some(value) => {
                    println!("{}", String::from_utf8_lossy(&value));
                    Ok(())
                }
                None => Ok(()),
            }
        }),
        Command::List => Database::<StdFileSystem>::open(config).and_then(|db| {
            let mut keys = db.metadata_keys()?;
            keys.sort();
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
            Ok(())
        }),
        Command::Set { key, value } => WritableDatabase::<StdFileSystem>::create_or_open(config).and_then(|mut db| {
            db.set_metadata(key.as_bytes(), value.as_bytes())?;
            db.commit()
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sondage-metadata: {e}");
            ExitCode::FAILURE
        }
    }
}
