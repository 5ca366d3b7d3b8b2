//! Storage key naming.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static STORAGE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@[a-z0-9]+(_[a-z0-9]+)+$").expect("valid storage key regex"));

const BACKUP_SUFFIX: &str = "_backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    InvalidKey(String),
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(value) => write!(
                f,
                "invalid storage key `{value}`; expected `@<domain>_<noun>`"
            ),
        }
    }
}

impl Error for KeyError {}

/// Validated key of the form `@<domain>_<noun>`, e.g. `@planner_tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        let trimmed = value.trim();
        if !STORAGE_KEY_RE.is_match(trimmed) {
            return Err(KeyError::InvalidKey(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slot holding the value this key had before its last overwrite.
    pub fn backup(&self) -> StorageKey {
        StorageKey(format!("{}{BACKUP_SUFFIX}", self.0))
    }

    pub fn is_backup(&self) -> bool {
        self.0.ends_with(BACKUP_SUFFIX)
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyError, StorageKey};

    #[test]
    fn parse_accepts_domain_noun_keys() {
        for key in ["@planner_tasks", "@notes_data", "@user_profile_v2"] {
            assert_eq!(StorageKey::parse(key).unwrap().as_str(), key);
        }
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for key in ["planner_tasks", "@planner", "@Planner_tasks", "@planner__tasks", ""] {
            assert!(matches!(
                StorageKey::parse(key),
                Err(KeyError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn backup_key_appends_suffix() {
        let key = StorageKey::parse("@notes_data").unwrap();
        let backup = key.backup();
        assert_eq!(backup.as_str(), "@notes_data_backup");
        assert!(backup.is_backup());
        assert!(!key.is_backup());
    }
}
