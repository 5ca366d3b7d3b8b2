//! Error taxonomy surfaced through cache state.
//!
//! None of these errors escape as panics or unhandled failures: the
//! persistent state hook and the resilient loader catch them and expose
//! them next to a usable fallback value.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not be read.
    StorageRead { key: String, message: String },
    /// Payload is not parseable JSON, encoded or plain.
    Malformed { key: String, message: String },
    /// Payload is a digest from the retired hashing codec.
    LegacyFormat { key: String },
    /// Payload parsed but has the wrong structure.
    ShapeValidation { key: String, message: String },
    /// A load did not settle before its deadline.
    Timeout { name: String, after: Duration },
    /// Backend rejected a write, or the value could not be serialized.
    Write { key: String, message: String },
    /// A caller-supplied load function failed.
    Load { name: String, message: String },
}

impl StorageError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageRead { .. } => "storage_read",
            Self::Malformed { .. } => "malformed_data",
            Self::LegacyFormat { .. } => "legacy_format",
            Self::ShapeValidation { .. } => "shape_validation",
            Self::Timeout { .. } => "timeout",
            Self::Write { .. } => "write_failed",
            Self::Load { .. } => "load_failed",
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageRead { key, message } => {
                write!(f, "failed to read `{key}`: {message}")
            }
            Self::Malformed { key, message } => {
                write!(f, "stored value for `{key}` is malformed: {message}")
            }
            Self::LegacyFormat { key } => write!(
                f,
                "stored value for `{key}` uses the legacy hash format and cannot be recovered"
            ),
            Self::ShapeValidation { key, message } => {
                write!(f, "stored value for `{key}` has an invalid shape: {message}")
            }
            Self::Timeout { name, after } => {
                write!(f, "loading `{name}` timed out after {}ms", after.as_millis())
            }
            Self::Write { key, message } => write!(f, "failed to write `{key}`: {message}"),
            Self::Load { name, message } => write!(f, "loading `{name}` failed: {message}"),
        }
    }
}

impl Error for StorageError {}
