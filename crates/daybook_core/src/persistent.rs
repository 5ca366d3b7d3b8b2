//! Persistent state hook: one typed record mirrored to one storage key.
//!
//! # Responsibility
//! - Load a record on mount: read, validate, decode or migrate, shape-check.
//! - Apply saves optimistically in memory and persist them, debounced.
//! - Keep optional `<key>_backup` copies of the previous payload.
//!
//! # Invariants
//! - Readers always get a usable value: the recovered record, the last
//!   known good value, or the initial value.
//! - Failed writes never roll back in-memory data.
//! - Writes for one key are serialized; saves inside the debounce window
//!   collapse into one write of the latest value.
//! - Legacy hash payloads are reported but left in place until the next
//!   successful write; malformed or mis-shaped payloads are removed.

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::codec::{self, PayloadFormat};
use crate::error::StorageError;
use crate::logging::payload_preview;
use crate::storage::{KeyValueStore, StorageKey};
use crate::validator::{is_absent_token, strict_shape, Shape};

/// Bounds shared by every value a `PersistentState` can hold.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Per-key persistence options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// Store payloads through the reversible codec.
    pub encryption: bool,
    /// Copy the previous payload to `<key>_backup` before overwriting.
    pub backup: bool,
    /// Collapse saves inside this window into one write. Zero writes inline.
    pub debounce: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            encryption: false,
            backup: false,
            debounce: Duration::ZERO,
        }
    }
}

impl StorageOptions {
    pub fn with_encryption(mut self, encryption: bool) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Point-in-time view of the in-memory cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<T> {
    pub data: T,
    pub is_loading: bool,
    pub error: Option<StorageError>,
}

enum ReadOutcome<T> {
    Absent,
    Loaded { value: T, migrate: bool },
    Rejected(StorageError),
}

struct Inner<T> {
    key: StorageKey,
    initial: T,
    backend: Arc<dyn KeyValueStore>,
    options: StorageOptions,
    shape: Shape<T>,
    cache: Mutex<CacheSnapshot<T>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    write_lock: tokio::sync::Mutex<()>,
}

/// Handle to one persisted record. Clones share the same cache.
pub struct PersistentState<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for PersistentState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> PersistentState<T> {
    /// Creates an unloaded handle that deserializes the whole payload as `T`.
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        key: StorageKey,
        initial: T,
        options: StorageOptions,
    ) -> Self {
        Self::with_shape(backend, key, initial, options, strict_shape::<T>())
    }

    /// Creates an unloaded handle using a custom shape check.
    pub fn with_shape(
        backend: Arc<dyn KeyValueStore>,
        key: StorageKey,
        initial: T,
        options: StorageOptions,
        shape: Shape<T>,
    ) -> Self {
        let cache = CacheSnapshot {
            data: initial.clone(),
            is_loading: true,
            error: None,
        };
        Self {
            inner: Arc::new(Inner {
                key,
                initial,
                backend,
                options,
                shape,
                cache: Mutex::new(cache),
                pending: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Creates a handle and performs the initial load.
    pub async fn open(
        backend: Arc<dyn KeyValueStore>,
        key: StorageKey,
        initial: T,
        options: StorageOptions,
    ) -> Self {
        let state = Self::new(backend, key, initial, options);
        state.load().await;
        state
    }

    pub fn key(&self) -> &StorageKey {
        &self.inner.key
    }

    pub fn options(&self) -> StorageOptions {
        self.inner.options
    }

    pub fn data(&self) -> T {
        self.cache().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.cache().is_loading
    }

    pub fn error(&self) -> Option<StorageError> {
        self.cache().error.clone()
    }

    pub fn snapshot(&self) -> CacheSnapshot<T> {
        self.cache().clone()
    }

    /// Returns whether a debounced write is scheduled and not yet flushed.
    pub fn has_pending_write(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Reads the stored payload into memory.
    ///
    /// A pending debounced save is written first so the read observes it;
    /// when that write fails the in-memory edit is kept as is.
    /// Absent data resets to the initial value. Any failure keeps the
    /// current in-memory value (the initial value on first load) and
    /// records the error.
    pub async fn load(&self) -> CacheSnapshot<T> {
        let had_pending = self.has_pending_write();
        self.flush().await;
        if had_pending && matches!(self.error(), Some(StorageError::Write { .. })) {
            // The unpersisted edit stays authoritative over older stored data.
            self.cache().is_loading = false;
            return self.snapshot();
        }

        let outcome = self.read_stored();
        let mut migrate = false;
        {
            let mut cache = self.cache();
            match outcome {
                ReadOutcome::Absent => {
                    cache.data = self.inner.initial.clone();
                    cache.error = None;
                }
                ReadOutcome::Loaded { value, migrate: needs_migration } => {
                    cache.data = value;
                    cache.error = None;
                    migrate = needs_migration;
                }
                ReadOutcome::Rejected(err) => {
                    warn!(
                        "event=state_load module=persistent status=fallback key={} error_code={} error={}",
                        self.inner.key,
                        err.code(),
                        err
                    );
                    cache.error = Some(err);
                }
            }
            cache.is_loading = false;
        }

        if migrate {
            info!(
                "event=migrate_payload module=persistent status=start key={} from=plain to=encoded",
                self.inner.key
            );
            self.persist_latest().await;
        }

        self.snapshot()
    }

    /// Re-reads storage, keeping the last known good value on failure.
    pub async fn reload(&self) -> CacheSnapshot<T> {
        self.cache().is_loading = true;
        self.load().await
    }

    /// Replaces the record.
    pub async fn save(&self, next: T) {
        self.update(move |_| next).await;
    }

    /// Derives the next record from the current one.
    ///
    /// Memory reflects the new value before this returns; persistence is
    /// inline when no debounce is configured, scheduled otherwise.
    pub async fn update(&self, next: impl FnOnce(&T) -> T) {
        if let Err(never) = self
            .try_update(|current| Ok::<T, Infallible>(next(current)))
            .await
        {
            match never {}
        }
    }

    /// Like [`Self::update`], but `next` may reject the change.
    ///
    /// `next` runs against the cache under its lock, so concurrent updates
    /// never derive from the same stale value. A rejection leaves memory
    /// and storage untouched.
    pub async fn try_update<E>(&self, next: impl FnOnce(&T) -> Result<T, E>) -> Result<T, E> {
        let value = {
            let mut cache = self.cache();
            let value = next(&cache.data)?;
            cache.data = value.clone();
            value
        };

        if self.inner.options.debounce.is_zero() {
            self.persist_latest().await;
        } else {
            self.schedule_write();
        }
        Ok(value)
    }

    /// Writes a scheduled debounced value now.
    pub async fn flush(&self) {
        let scheduled = self.pending().take();
        if let Some(handle) = scheduled {
            if handle.is_finished() {
                return;
            }
            handle.abort();
            self.persist_latest().await;
        }
    }

    /// Removes the stored record and resets memory to the initial value.
    pub async fn clear(&self) -> Result<(), StorageError> {
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }

        let _write = self.inner.write_lock.lock().await;
        {
            let mut cache = self.cache();
            cache.data = self.inner.initial.clone();
            cache.error = None;
        }
        self.inner
            .backend
            .remove_item(self.inner.key.as_str())
            .map_err(|err| StorageError::Write {
                key: self.inner.key.to_string(),
                message: err.to_string(),
            })?;
        info!(
            "event=state_clear module=persistent status=ok key={}",
            self.inner.key
        );
        Ok(())
    }

    /// Adopts the `<key>_backup` payload when it decodes into a valid record.
    ///
    /// Returns `Ok(false)` when no backup exists.
    pub async fn restore_backup(&self) -> Result<bool, StorageError> {
        let backup_key = self.inner.key.backup();
        let raw = self
            .inner
            .backend
            .get_item(backup_key.as_str())
            .map_err(|err| StorageError::StorageRead {
                key: backup_key.to_string(),
                message: err.to_string(),
            })?;
        let raw = match raw {
            Some(raw) if !is_absent_token(&raw) => raw,
            _ => return Ok(false),
        };

        let (value, _) = self.decode_payload(&backup_key, &raw)?;
        let record = (self.inner.shape)(value).map_err(|err| StorageError::ShapeValidation {
            key: backup_key.to_string(),
            message: err.to_string(),
        })?;

        {
            let mut cache = self.cache();
            cache.data = record;
            cache.error = None;
        }
        self.persist_latest().await;
        info!(
            "event=restore_backup module=persistent status=ok key={}",
            self.inner.key
        );
        Ok(true)
    }

    fn read_stored(&self) -> ReadOutcome<T> {
        let key = &self.inner.key;
        let raw = match self.inner.backend.get_item(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return ReadOutcome::Absent,
            Err(err) => {
                return ReadOutcome::Rejected(StorageError::StorageRead {
                    key: key.to_string(),
                    message: err.to_string(),
                });
            }
        };

        if is_absent_token(&raw) {
            debug!("event=state_load module=persistent status=absent key={key}");
            return ReadOutcome::Absent;
        }

        let (value, format) = match self.decode_payload(key, &raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                if !matches!(err, StorageError::LegacyFormat { .. }) {
                    self.discard_stored(&raw);
                }
                return ReadOutcome::Rejected(err);
            }
        };

        match (self.inner.shape)(value) {
            Ok(record) => ReadOutcome::Loaded {
                value: record,
                migrate: self.inner.options.encryption && format == PayloadFormat::Plain,
            },
            Err(err) => {
                self.discard_stored(&raw);
                ReadOutcome::Rejected(StorageError::ShapeValidation {
                    key: key.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Decodes `raw` into JSON, trying the configured format first and the
    /// other one second. Legacy hashes are never adopted as data.
    fn decode_payload(
        &self,
        key: &StorageKey,
        raw: &str,
    ) -> Result<(Value, PayloadFormat), StorageError> {
        if codec::is_legacy_hash(raw) {
            return Err(StorageError::LegacyFormat {
                key: key.to_string(),
            });
        }

        if self.inner.options.encryption {
            if let Ok(decoded) = codec::decode(raw) {
                if let Ok(value) = serde_json::from_str::<Value>(&decoded.text) {
                    return Ok((value, decoded.format));
                }
            }
            return parse_plain(key, raw).map(|value| (value, PayloadFormat::Plain));
        }

        let plain_error = match parse_plain(key, raw) {
            Ok(value) => return Ok((value, PayloadFormat::Plain)),
            Err(err) => err,
        };
        match codec::decode(raw) {
            Ok(decoded) if decoded.format == PayloadFormat::Encoded => {
                serde_json::from_str::<Value>(&decoded.text)
                    .map(|value| (value, PayloadFormat::Encoded))
                    .map_err(|_| plain_error)
            }
            _ => Err(plain_error),
        }
    }

    fn discard_stored(&self, raw: &str) {
        warn!(
            "event=discard_payload module=persistent status=fallback key={} payload={}",
            self.inner.key,
            payload_preview(raw)
        );
        if let Err(err) = self.inner.backend.remove_item(self.inner.key.as_str()) {
            warn!(
                "event=discard_payload module=persistent status=error key={} error={}",
                self.inner.key, err
            );
        }
    }

    fn schedule_write(&self) {
        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let state = self.clone();
        let delay = self.inner.options.debounce;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.persist_latest().await;
        }));
    }

    /// Writes the current in-memory value. Failures are logged and recorded.
    async fn persist_latest(&self) {
        let _write = self.inner.write_lock.lock().await;
        let data = self.data();

        match self.write_value(&data) {
            Ok(()) => {
                let mut cache = self.cache();
                if matches!(cache.error, Some(StorageError::Write { .. })) {
                    cache.error = None;
                }
                debug!(
                    "event=state_write module=persistent status=ok key={}",
                    self.inner.key
                );
            }
            Err(err) => {
                warn!(
                    "event=state_write module=persistent status=error key={} error_code={} error={}",
                    self.inner.key,
                    err.code(),
                    err
                );
                self.cache().error = Some(err);
            }
        }
    }

    fn write_value(&self, data: &T) -> Result<(), StorageError> {
        let key = &self.inner.key;
        let write_error = |message: String| StorageError::Write {
            key: key.to_string(),
            message,
        };

        let json = serde_json::to_string(data).map_err(|err| write_error(err.to_string()))?;
        let payload = if self.inner.options.encryption {
            codec::encode(&json)
        } else {
            json
        };

        if self.inner.options.backup {
            self.write_backup(&payload);
        }

        self.inner
            .backend
            .set_item(key.as_str(), &payload)
            .map_err(|err| write_error(err.to_string()))
    }

    fn write_backup(&self, next_payload: &str) {
        let key = &self.inner.key;
        let previous = match self.inner.backend.get_item(key.as_str()) {
            Ok(Some(previous)) if previous != next_payload => previous,
            Ok(_) => return,
            Err(err) => {
                warn!("event=state_backup module=persistent status=error key={key} error={err}");
                return;
            }
        };
        if let Err(err) = self
            .inner
            .backend
            .set_item(key.backup().as_str(), &previous)
        {
            warn!("event=state_backup module=persistent status=error key={key} error={err}");
        }
    }

    fn cache(&self) -> MutexGuard<'_, CacheSnapshot<T>> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_plain(key: &StorageKey, raw: &str) -> Result<Value, StorageError> {
    serde_json::from_str::<Value>(raw).map_err(|err| StorageError::Malformed {
        key: key.to_string(),
        message: err.to_string(),
    })
}
