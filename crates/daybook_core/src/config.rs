//! Runtime configuration for hosts embedding the store.
//!
//! # Responsibility
//! - Describe where the store lives and how it logs.
//! - Load that description from a JSON file named on the command line or
//!   in `DAYBOOK_CONFIG`.
//!
//! # Invariants
//! - A loaded config has been validated; invalid files are rejected whole.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::{default_log_level, normalize_level};
use crate::persistent::StorageOptions;

pub const CONFIG_ENV_VAR: &str = "DAYBOOK_CONFIG";
const DEFAULT_DB_FILE_NAME: &str = "daybook.sqlite3";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaybookConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling logs; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub encryption: bool,
    pub backup: bool,
    pub default_debounce_ms: u64,
}

impl Default for DaybookConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
            encryption: false,
            backup: false,
            default_debounce_ms: 0,
        }
    }
}

impl DaybookConfig {
    /// Loads from `explicit`, else from `DAYBOOK_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));
        match path {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("db_path is required".to_string()));
        }
        normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;
        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be absolute, got `{}`",
                    log_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Storage options applied to keys that do not override them.
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions::default()
            .with_encryption(self.encryption)
            .with_backup(self.backup)
            .with_debounce(Duration::from_millis(self.default_debounce_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DaybookConfig};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn missing_fields_take_defaults() {
        let config: DaybookConfig =
            serde_json::from_str(r#"{"db_path": "/tmp/app.sqlite3", "encryption": true}"#)
                .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/app.sqlite3"));
        assert!(config.encryption);
        assert!(!config.backup);
        assert_eq!(config.default_debounce_ms, 0);
        config.validate().unwrap();
    }

    #[test]
    fn from_path_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daybook.json");
        std::fs::write(&path, r#"{"log_level": "loud"}"#).unwrap();
        assert!(matches!(
            DaybookConfig::from_path(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, r#"{"default_debounce_ms": 750, "backup": true}"#).unwrap();
        let options = DaybookConfig::from_path(&path).unwrap().storage_options();
        assert_eq!(options.debounce, Duration::from_millis(750));
        assert!(options.backup);
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let config = DaybookConfig {
            log_dir: Some(PathBuf::from("logs")),
            ..DaybookConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unreadable_file_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DaybookConfig::from_path(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
