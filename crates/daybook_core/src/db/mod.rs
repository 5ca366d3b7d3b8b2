//! SQLite file layer under the key-value store.
//!
//! # Responsibility
//! - Open store files (or private in-memory stores) with a busy timeout.
//! - Bring the `kv_store` table up to the schema this build understands.
//!
//! # Invariants
//! - The store schema version lives in `PRAGMA user_version`.
//! - A store written by a newer build is refused, never downgraded.
//! - `SqliteKeyValueStore` only ever sees fully migrated connections.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The store file was migrated by a newer build.
    StoreTooNew { store_version: u32, supported: u32 },
    /// A schema step failed; the store stays at its previous version.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "key-value store error: {err}"),
            Self::StoreTooNew {
                store_version,
                supported,
            } => write!(
                f,
                "key-value store uses schema v{store_version}; this build reads up to v{supported}"
            ),
            Self::Migration {
                version,
                name,
                source,
            } => write!(
                f,
                "key-value store migration v{version} ({name}) failed: {source}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::StoreTooNew { .. } => None,
            Self::Migration { source, .. } => Some(source),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
