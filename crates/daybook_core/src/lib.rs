//! Core persistence for Daybook.
//! Every provider's state reaches storage through this crate.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod persistent;
pub mod providers;
pub mod record;
pub mod registry;
pub mod resilient;
pub mod storage;
pub mod validator;

pub use codec::{decode, encode, CodecError, Decoded, PayloadFormat};
pub use config::{ConfigError, DaybookConfig};
pub use error::StorageError;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::profile::{ThemePreference, UserProfile};
pub use model::todo::{TodoId, TodoItem};
pub use persistent::{CacheSnapshot, PersistentState, Record, StorageOptions};
pub use providers::profile::{ProfileError, ProfileProvider, USER_PROFILE_KEY};
pub use providers::todo::{TodoError, TodoProvider, TODO_ITEMS_KEY};
pub use record::{merge_record, shallow_merge};
pub use registry::{RegistryError, StorageRegistry};
pub use resilient::{load_fn, AppState, LoadOptions, LoaderSnapshot, ResilientLoader};
pub use storage::{
    BackendError, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, StorageKey,
};
pub use validator::{is_well_formed, parse_or_default};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
