//! Key-value storage backends.
//!
//! # Responsibility
//! - Define the string key-value contract every persisted record goes through.
//! - Provide SQLite and in-memory implementations.
//!
//! # Invariants
//! - Backends guarantee single-key atomicity only.
//! - Application code reaches a backend only through `PersistentState`.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod key;
mod memory;
mod sqlite;

pub use key::{KeyError, StorageKey};
pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

pub type BackendResult<T> = Result<T, BackendError>;

/// Transport-level backend failure.
#[derive(Debug)]
pub enum BackendError {
    Db(DbError),
    Unavailable(String),
    Rejected { key: String, reason: String },
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(reason) => write!(f, "storage backend unavailable: {reason}"),
            Self::Rejected { key, reason } => {
                write!(f, "storage backend rejected write to `{key}`: {reason}")
            }
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Process-wide string store addressed by [`StorageKey`]-shaped keys.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> BackendResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> BackendResult<()>;
    fn remove_item(&self, key: &str) -> BackendResult<()>;
    /// Returns all stored keys in ascending order.
    fn keys(&self) -> BackendResult<Vec<String>>;
}
