//! Key ownership registry.
//!
//! # Responsibility
//! - Hand out `PersistentState` handles over one shared backend.
//! - Guarantee that no two providers own the same storage key.
//!
//! # Invariants
//! - A key stays claimed until released explicitly.
//! - Backup slots (`<key>_backup`) are derived, never claimed directly.

use crate::persistent::{PersistentState, Record, StorageOptions};
use crate::storage::{KeyError, KeyValueStore, StorageKey};
use crate::validator::{strict_shape, Shape};
use log::info;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidKey(KeyError),
    BackupKeyClaim(String),
    KeyAlreadyClaimed(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(err) => write!(f, "{err}"),
            Self::BackupKeyClaim(key) => write!(f, "backup slot cannot be claimed: {key}"),
            Self::KeyAlreadyClaimed(key) => write!(f, "storage key already claimed: {key}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKey(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KeyError> for RegistryError {
    fn from(value: KeyError) -> Self {
        Self::InvalidKey(value)
    }
}

/// Owner of one backend and the set of keys handed out over it.
pub struct StorageRegistry {
    backend: Arc<dyn KeyValueStore>,
    claimed: Mutex<BTreeSet<StorageKey>>,
}

impl StorageRegistry {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            claimed: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.backend)
    }

    /// Claims `key` for a record deserialized as a whole.
    pub fn claim<T: Record>(
        &self,
        key: &str,
        initial: T,
        options: StorageOptions,
    ) -> Result<PersistentState<T>, RegistryError> {
        self.claim_with_shape(key, initial, options, strict_shape::<T>())
    }

    /// Claims `key` with a custom shape check.
    pub fn claim_with_shape<T: Record>(
        &self,
        key: &str,
        initial: T,
        options: StorageOptions,
        shape: Shape<T>,
    ) -> Result<PersistentState<T>, RegistryError> {
        let key = StorageKey::parse(key)?;
        if key.is_backup() {
            return Err(RegistryError::BackupKeyClaim(key.to_string()));
        }

        let mut claimed = self.claimed();
        if claimed.contains(&key) {
            return Err(RegistryError::KeyAlreadyClaimed(key.to_string()));
        }
        claimed.insert(key.clone());
        info!("event=key_claim module=registry status=ok key={key}");

        Ok(PersistentState::with_shape(
            self.backend(),
            key,
            initial,
            options,
            shape,
        ))
    }

    /// Releases a claim. Returns whether `key` was claimed.
    pub fn release(&self, key: &StorageKey) -> bool {
        self.claimed().remove(key)
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        StorageKey::parse(key)
            .map(|key| self.claimed().contains(&key))
            .unwrap_or(false)
    }

    /// Claimed keys in ascending order.
    pub fn claimed_keys(&self) -> Vec<StorageKey> {
        self.claimed().iter().cloned().collect()
    }

    fn claimed(&self) -> MutexGuard<'_, BTreeSet<StorageKey>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
