//! Operator CLI for inspecting a Daybook store.
//!
//! # Responsibility
//! - Expose health and key-level inspection of a SQLite store.
//! - Show payloads decoded, never as raw obfuscated text.
//!
//! # Invariants
//! - Legacy hashed payloads are reported, never printed as data.
//! - Failures go to stderr with exit code 2.

use std::env;
use std::path::{Path, PathBuf};

use daybook_core::codec::{self, PayloadFormat};
use daybook_core::{init_logging, DaybookConfig, KeyValueStore, SqliteKeyValueStore, StorageKey};
use log::info;

const USAGE: &str =
    "usage: daybook [--config <path>] <ping|keys [db]|get [db] <key>|remove [db] <key>>";

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let invocation = parse_args(env::args().skip(1).collect())?;
    let config = DaybookConfig::load(invocation.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(log_dir) = config.log_dir.as_deref().and_then(Path::to_str) {
        init_logging(&config.log_level, log_dir)?;
    }

    let output = match invocation.command {
        Command::Ping => format!(
            "daybook_core ping={} version={}",
            daybook_core::ping(),
            daybook_core::core_version()
        ),
        Command::Keys { db } => {
            let store = open_store(db.as_deref().unwrap_or(&config.db_path))?;
            store.keys().map_err(|e| e.to_string())?.join("\n")
        }
        Command::Get { db, key } => {
            let store = open_store(db.as_deref().unwrap_or(&config.db_path))?;
            describe_payload(&store, &key)?
        }
        Command::Remove { db, key } => {
            let store = open_store(db.as_deref().unwrap_or(&config.db_path))?;
            store.remove_item(key.as_str()).map_err(|e| e.to_string())?;
            info!("event=cli_remove module=cli status=ok key={key}");
            format!("removed {key}")
        }
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Ping,
    Keys { db: Option<PathBuf> },
    Get { db: Option<PathBuf>, key: StorageKey },
    Remove { db: Option<PathBuf>, key: StorageKey },
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(mut args: Vec<String>) -> Result<Invocation, String> {
    let mut config = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            return Err(USAGE.to_string());
        }
        config = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }

    let (name, rest) = args.split_first().ok_or_else(|| USAGE.to_string())?;
    let command = match (name.as_str(), rest) {
        ("ping", []) => Command::Ping,
        ("keys", []) => Command::Keys { db: None },
        ("keys", [db]) => Command::Keys {
            db: Some(PathBuf::from(db)),
        },
        ("get", [key]) => Command::Get {
            db: None,
            key: parse_key(key)?,
        },
        ("get", [db, key]) => Command::Get {
            db: Some(PathBuf::from(db)),
            key: parse_key(key)?,
        },
        ("remove", [key]) => Command::Remove {
            db: None,
            key: parse_key(key)?,
        },
        ("remove", [db, key]) => Command::Remove {
            db: Some(PathBuf::from(db)),
            key: parse_key(key)?,
        },
        _ => return Err(USAGE.to_string()),
    };
    Ok(Invocation { config, command })
}

fn parse_key(raw: &str) -> Result<StorageKey, String> {
    StorageKey::parse(raw).map_err(|e| e.to_string())
}

fn open_store(path: &Path) -> Result<SqliteKeyValueStore, String> {
    SqliteKeyValueStore::open(path).map_err(|e| e.to_string())
}

fn describe_payload(store: &dyn KeyValueStore, key: &StorageKey) -> Result<String, String> {
    let raw = store
        .get_item(key.as_str())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("{key} is not stored"))?;

    if codec::is_legacy_hash(&raw) {
        return Ok(format!(
            "{key} holds a legacy hashed payload ({} chars); it cannot be decoded",
            raw.len()
        ));
    }
    let decoded = codec::decode(&raw).map_err(|e| e.to_string())?;
    let label = match decoded.format {
        PayloadFormat::Encoded => "encoded",
        PayloadFormat::Plain => "plain",
        PayloadFormat::Unrecognized => "unrecognized",
    };
    Ok(format!("{key} [{label}]\n{}", decoded.text))
}
