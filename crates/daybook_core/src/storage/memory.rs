//! In-process key-value store for tests and isolated runtimes.
//!
//! Supports fault injection and per-key write counting so callers can
//! observe read fallbacks and debounce collapsing.

use super::{BackendError, BackendResult, KeyValueStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, String>,
    writes: BTreeMap<String, usize>,
    failing_keys: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    state: Mutex<MemoryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` without counting a write.
    pub fn with_item(self, key: &str, value: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.items.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Makes every subsequent read fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write or removal fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes writes and removals of `key` alone fail until reset.
    pub fn set_fail_writes_for(&self, key: &str, fail: bool) {
        if let Ok(mut state) = self.lock() {
            if fail {
                state.failing_keys.insert(key.to_string());
            } else {
                state.failing_keys.remove(key);
            }
        }
    }

    /// Number of successful `set_item` calls for `key`.
    pub fn write_count(&self, key: &str) -> usize {
        self.lock()
            .map(|state| state.writes.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Current raw value, bypassing fault injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|state| state.items.get(key).cloned())
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| BackendError::Unavailable("memory store mutex poisoned".to_string()))
    }

    fn check_writable(&self, state: &MemoryState, key: &str) -> BackendResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) || state.failing_keys.contains(key) {
            return Err(BackendError::Rejected {
                key: key.to_string(),
                reason: "write failure injected".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> BackendResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("read failure injected".to_string()));
        }
        Ok(self.lock()?.items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> BackendResult<()> {
        let mut state = self.lock()?;
        self.check_writable(&state, key)?;
        state.items.insert(key.to_string(), value.to_string());
        *state.writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> BackendResult<()> {
        let mut state = self.lock()?;
        self.check_writable(&state, key)?;
        state.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> BackendResult<Vec<String>> {
        Ok(self.lock()?.items.keys().cloned().collect())
    }
}
