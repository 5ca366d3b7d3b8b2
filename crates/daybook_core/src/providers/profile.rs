//! User profile provider.

use crate::error::StorageError;
use crate::model::profile::UserProfile;
use crate::persistent::{PersistentState, StorageOptions};
use crate::record::merge_record;
use crate::registry::{RegistryError, StorageRegistry};
use crate::validator::json_kind;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const USER_PROFILE_KEY: &str = "@user_profile";

#[derive(Debug)]
pub enum ProfileError {
    /// Patch is not a JSON object.
    InvalidPatch(String),
    /// Patch produced a record that no longer matches `UserProfile`.
    Incompatible(serde_json::Error),
    Storage(StorageError),
}

impl Display for ProfileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPatch(kind) => write!(f, "profile patch must be an object, got {kind}"),
            Self::Incompatible(err) => write!(f, "profile patch is incompatible: {err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProfileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPatch(_) => None,
            Self::Incompatible(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<StorageError> for ProfileError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Profile persisted under [`USER_PROFILE_KEY`], encoded and backed up.
pub struct ProfileProvider {
    state: PersistentState<UserProfile>,
}

impl ProfileProvider {
    pub async fn open(
        registry: &StorageRegistry,
        options: StorageOptions,
    ) -> Result<Self, RegistryError> {
        let state = registry.claim(
            USER_PROFILE_KEY,
            UserProfile::default(),
            options.with_encryption(true).with_backup(true),
        )?;
        state.load().await;
        Ok(Self { state })
    }

    pub fn state(&self) -> &PersistentState<UserProfile> {
        &self.state
    }

    pub fn profile(&self) -> UserProfile {
        self.state.data()
    }

    /// Shallow-merges `patch` into the current profile. Concurrent updates
    /// each merge into the result of the previous one.
    pub async fn update(&self, patch: Value) -> Result<UserProfile, ProfileError> {
        if !patch.is_object() {
            return Err(ProfileError::InvalidPatch(json_kind(&patch).to_string()));
        }
        self.state
            .try_update(|current| {
                merge_record(current, &patch).map_err(ProfileError::Incompatible)
            })
            .await
    }

    /// Reverts memory and storage to an empty profile.
    pub async fn sign_out(&self) -> Result<(), ProfileError> {
        self.state.clear().await?;
        Ok(())
    }

    /// Restores the profile written before the last save.
    pub async fn restore_previous(&self) -> Result<bool, ProfileError> {
        Ok(self.state.restore_backup().await?)
    }
}

