//! Retry, timeout and staleness tracking for async-initialized state.
//!
//! # Responsibility
//! - Run a caller-supplied load with a deadline and exponential backoff.
//! - Track when loaded data goes stale and refetch on foreground.
//!
//! # Invariants
//! - Timeouts are soft: the timed-out load keeps running detached and its
//!   result is ignored.
//! - A load superseded by `reload` or `reset` never writes state.
//! - Terminal failure reverts `data` to the initial value.
//! - Persisted storage is never touched here.

use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::StorageError;

const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(5_000);

pub type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send>>;
pub type LoadFn<T> = Arc<dyn Fn() -> LoadFuture<T> + Send + Sync>;
pub type Validate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Boxes an async closure into a [`LoadFn`].
pub fn load_fn<T, F, Fut>(f: F) -> LoadFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as LoadFuture<T>)
}

/// Loader tuning. Defaults: 3 attempts, 10s timeout, 5 min stale time
/// checked every 60s, no refetch on focus.
pub struct LoadOptions<T> {
    /// Total attempts, including the first.
    pub retries: u32,
    /// Deadline for each attempt.
    pub timeout: Duration,
    pub stale_time: Duration,
    pub stale_check_interval: Duration,
    pub refetch_on_focus: bool,
    /// A loaded value failing this predicate counts as a failed attempt.
    pub validate: Option<Validate<T>>,
}

impl<T> Default for LoadOptions<T> {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(10),
            stale_time: Duration::from_secs(5 * 60),
            stale_check_interval: Duration::from_secs(60),
            refetch_on_focus: false,
            validate: None,
        }
    }
}

impl<T> Clone for LoadOptions<T> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            timeout: self.timeout,
            stale_time: self.stale_time,
            stale_check_interval: self.stale_check_interval,
            refetch_on_focus: self.refetch_on_focus,
            validate: self.validate.clone(),
        }
    }
}

/// Host application lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderSnapshot<T> {
    pub data: T,
    pub is_loading: bool,
    pub error: Option<StorageError>,
    pub is_stale: bool,
}

struct LoaderState<T> {
    snapshot: LoaderSnapshot<T>,
    last_loaded: Option<Instant>,
    generation: u64,
    app_state: AppState,
}

struct LoaderInner<T> {
    name: String,
    initial: T,
    load: LoadFn<T>,
    options: LoadOptions<T>,
    state: Mutex<LoaderState<T>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for LoaderInner<T> {
    fn drop(&mut self) {
        let monitor = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = monitor {
            handle.abort();
        }
    }
}

/// Async-loaded state with retry, soft timeout and staleness tracking.
pub struct ResilientLoader<T> {
    inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for ResilientLoader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ResilientLoader<T> {
    /// Creates an idle loader; nothing runs until [`Self::reload`].
    pub fn new(
        name: impl Into<String>,
        initial: T,
        load: LoadFn<T>,
        options: LoadOptions<T>,
    ) -> Self {
        let snapshot = LoaderSnapshot {
            data: initial.clone(),
            is_loading: true,
            error: None,
            is_stale: false,
        };
        Self {
            inner: Arc::new(LoaderInner {
                name: name.into(),
                initial,
                load,
                options,
                state: Mutex::new(LoaderState {
                    snapshot,
                    last_loaded: None,
                    generation: 0,
                    app_state: AppState::Active,
                }),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Creates a loader, starts staleness tracking and runs the first load.
    pub async fn mount(
        name: impl Into<String>,
        initial: T,
        load: LoadFn<T>,
        options: LoadOptions<T>,
    ) -> Self {
        let loader = Self::new(name, initial, load, options);
        loader.start_stale_monitor();
        loader.reload().await;
        loader
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn data(&self) -> T {
        self.state().snapshot.data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().snapshot.is_loading
    }

    pub fn error(&self) -> Option<StorageError> {
        self.state().snapshot.error.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.state().snapshot.is_stale
    }

    pub fn snapshot(&self) -> LoaderSnapshot<T> {
        self.state().snapshot.clone()
    }

    /// Runs the load with retries. Supersedes any load already in flight.
    pub async fn reload(&self) -> LoaderSnapshot<T> {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.snapshot.is_loading = true;
            state.generation
        };

        let attempts = self.inner.options.retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.attempt().await {
                Ok(value) => {
                    let mut state = self.state();
                    if state.generation == generation {
                        state.snapshot = LoaderSnapshot {
                            data: value,
                            is_loading: false,
                            error: None,
                            is_stale: false,
                        };
                        state.last_loaded = Some(Instant::now());
                        debug!(
                            "event=resilient_load module=resilient status=ok name={} attempt={}",
                            self.inner.name,
                            attempt + 1
                        );
                    }
                    return state.snapshot.clone();
                }
                Err(err) => {
                    warn!(
                        "event=resilient_load module=resilient status=retry name={} attempt={} of={} error_code={} error={}",
                        self.inner.name,
                        attempt + 1,
                        attempts,
                        err.code(),
                        err
                    );
                    last_error = Some(err);
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            if self.state().generation != generation {
                return self.snapshot();
            }
        }

        let mut state = self.state();
        if state.generation == generation {
            state.snapshot.data = self.inner.initial.clone();
            state.snapshot.error = last_error;
            state.snapshot.is_loading = false;
            warn!(
                "event=resilient_load module=resilient status=error name={} attempts={}",
                self.inner.name, attempts
            );
        }
        state.snapshot.clone()
    }

    /// Reverts to the initial value and abandons any in-flight load.
    pub fn reset(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.snapshot = LoaderSnapshot {
            data: self.inner.initial.clone(),
            is_loading: false,
            error: None,
            is_stale: true,
        };
        state.last_loaded = None;
    }

    /// Marks the data stale once `stale_time` has passed since the last
    /// successful load. Returns the resulting stale flag.
    pub fn check_staleness(&self) -> bool {
        let mut state = self.state();
        let expired = state
            .last_loaded
            .is_some_and(|loaded| loaded.elapsed() >= self.inner.options.stale_time);
        if expired && !state.snapshot.is_stale {
            state.snapshot.is_stale = true;
            info!(
                "event=resilient_stale module=resilient status=stale name={}",
                self.inner.name
            );
        }
        state.snapshot.is_stale
    }

    /// Records a host lifecycle transition. Returning to the foreground
    /// while stale triggers a reload when `refetch_on_focus` is set.
    ///
    /// Returns whether a reload ran.
    pub async fn on_app_state_change(&self, next: AppState) -> bool {
        let should_reload = {
            let mut state = self.state();
            let previous = state.app_state;
            state.app_state = next;
            self.inner.options.refetch_on_focus
                && previous != AppState::Active
                && next == AppState::Active
                && state.snapshot.is_stale
        };
        if should_reload {
            info!(
                "event=resilient_refetch module=resilient status=start name={} reason=focus",
                self.inner.name
            );
            self.reload().await;
        }
        should_reload
    }

    /// Starts the background staleness tick. Idempotent.
    pub fn start_stale_monitor(&self) {
        let mut monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return;
        }

        let weak: Weak<LoaderInner<T>> = Arc::downgrade(&self.inner);
        let period = self.inner.options.stale_check_interval;
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ResilientLoader { inner }.check_staleness();
            }
        }));
    }

    async fn attempt(&self) -> Result<T, StorageError> {
        let name = &self.inner.name;
        let timeout = self.inner.options.timeout;
        // Detached so a timed-out load keeps running; its result is dropped.
        let in_flight = tokio::spawn((self.inner.load)());

        let value = match tokio::time::timeout(timeout, in_flight).await {
            Err(_) => {
                return Err(StorageError::Timeout {
                    name: name.clone(),
                    after: timeout,
                });
            }
            Ok(Err(join_err)) => {
                return Err(StorageError::Load {
                    name: name.clone(),
                    message: join_err.to_string(),
                });
            }
            Ok(Ok(result)) => result?,
        };

        if let Some(validate) = &self.inner.options.validate {
            if !validate(&value) {
                return Err(StorageError::ShapeValidation {
                    key: name.clone(),
                    message: "loaded value failed validation".to_string(),
                });
            }
        }
        Ok(value)
    }

    fn state(&self) -> MutexGuard<'_, LoaderState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backoff before retrying after failed attempt `attempt` (zero-based):
/// `500ms * 2^attempt`, capped at 5s.
pub fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BASE_RETRY_DELAY
        .checked_mul(factor)
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

#[cfg(test)]
mod tests {
    use super::retry_delay;
    use std::time::Duration;

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(1), Duration::from_millis(1_000));
        assert_eq!(retry_delay(2), Duration::from_millis(2_000));
        assert_eq!(retry_delay(3), Duration::from_millis(4_000));
        assert_eq!(retry_delay(4), Duration::from_millis(5_000));
        assert_eq!(retry_delay(40), Duration::from_millis(5_000));
    }
}
