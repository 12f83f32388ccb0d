//! [`ManagedCache`] directly over one [`PersistentEngine`].
//!
//! A [`DurableCache`] adds three things to the raw engine:
//!
//! - **Creation retries**: a bounded open loop that deletes stale store files
//!   after version-mismatch and IO failures, and gives up immediately on
//!   anything else. Exhausting the loop yields a closed cache, not an error.
//! - **Circuit breaking**: engine errors are logged and swallowed; once the
//!   count of consecutive failures exceeds the configured threshold the
//!   engine is closed and the cache degrades to no-ops for good.
//! - **Shutdown registration**: the cache registers with the injected
//!   [`ShutdownRegistry`] so the process-wide sweep closes it exactly once.
//!   A second live cache with the same name is closed on the spot.
//!
//! The engine lives in an `ArcSwap` cell holding either `Open(engine)` or
//! `Closed`. Operations take an owned snapshot of the cell, so a close racing
//! with an in-flight call only makes that call fail gracefully.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use arc_swap::ArcSwap;
use larder_core::thread::assert_off_primary_thread;
use larder_core::{
    CacheConfig, EngineError, EngineErrorKind, EngineFactory, ManagedCache, PersistentEngine,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{RegistrationId, ShutdownRegistry, ShutdownTarget};
use crate::telemetry::{CACHE_CIRCUIT_BREAKS, CACHE_IO_ERRORS, CACHE_OPEN_FAILURES};

/// Contents of the engine cell.
enum EngineState<K, V> {
    Open(Arc<dyn PersistentEngine<K, V>>),
    Closed,
}

/// Who asked for a close. Decides which side effects run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOrigin {
    /// `ManagedCache::close` from the owner.
    Owner,
    /// The registry's shutdown sweep, which clears the registry itself.
    Sweep,
    /// Too many consecutive engine errors. May fire while a wrapping layer
    /// holds its own lock, so the pre-close hook is skipped.
    CircuitBreaker,
}

/// Hook run by a durable cache right before its engine closes.
///
/// Implemented by wrapping layers that buffer writes, so that a close the
/// wrapper did not initiate (the shutdown sweep) still writes them back.
pub(crate) trait PreCloseFlush: Send + Sync {
    fn flush_before_close(&self);
}

// ---------------------------------------------------------------------------
// DurableCache
// ---------------------------------------------------------------------------

/// Cache over a single persistent engine with retries, circuit breaking and
/// shutdown registration.
pub struct DurableCache<K, V> {
    name: String,
    location: String,
    state: ArcSwap<EngineState<K, V>>,
    io_errors: AtomicU32,
    io_error_threshold: u32,
    registry: Weak<ShutdownRegistry>,
    registration: Mutex<Option<RegistrationId>>,
    pre_close: Mutex<Option<Weak<dyn PreCloseFlush>>>,
}

impl<K, V> DurableCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Opens the engine and, when `config.close_on_shutdown` is set,
    /// registers the cache with `registry`.
    ///
    /// Never fails: if the engine cannot be opened, or another live cache
    /// already owns `config.name`, the returned cache is closed.
    pub fn open(
        config: &CacheConfig,
        factory: &dyn EngineFactory<K, V>,
        registry: &Arc<ShutdownRegistry>,
    ) -> Arc<Self> {
        let location = factory.location();
        let state = match open_engine(config, factory, &location) {
            Some(engine) => EngineState::Open(engine),
            None => {
                metrics::counter!(CACHE_OPEN_FAILURES, "cache" => config.name.clone()).increment(1);
                EngineState::Closed
            }
        };

        let cache = Arc::new(Self {
            name: config.name.clone(),
            location,
            state: ArcSwap::from_pointee(state),
            io_errors: AtomicU32::new(0),
            io_error_threshold: config.io_error_threshold,
            registry: Arc::downgrade(registry),
            registration: Mutex::new(None),
            pre_close: Mutex::new(None),
        });

        if cache.is_closed() || !config.close_on_shutdown {
            return cache;
        }

        let target: Arc<dyn ShutdownTarget> = cache.clone();
        match registry.register(target) {
            Ok(id) => *cache.registration.lock() = Some(id),
            Err(err) => {
                error!(cache = %cache.name, error = %err, "cache registration rejected; closing the new instance");
                cache.close_from(CloseOrigin::Owner);
            }
        }
        cache
    }

    /// Where the engine keeps its files.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Number of live entries in the engine, or `None` when closed or failing.
    #[must_use]
    pub fn keys_count(&self) -> Option<u64> {
        self.with_engine("keys_count", |engine| engine.keys_count())
    }

    /// Consecutive engine errors seen since the last successful call.
    #[must_use]
    pub fn io_error_count(&self) -> u32 {
        self.io_errors.load(Ordering::Acquire)
    }

    /// Whether this instance holds a shutdown registration.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Attaches the hook run before an owner or sweep close.
    pub(crate) fn attach_pre_close(&self, hook: Weak<dyn PreCloseFlush>) {
        *self.pre_close.lock() = Some(hook);
    }

    /// Runs `f` against the open engine, if any.
    ///
    /// Errors are logged and counted and turn into `None`.
    fn with_engine<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn PersistentEngine<K, V>) -> Result<R, EngineError>,
    ) -> Option<R> {
        assert_off_primary_thread(operation);
        let state = self.state.load_full();
        let EngineState::Open(engine) = &*state else {
            return None;
        };

        match f(engine.as_ref()) {
            Ok(result) => {
                self.io_errors.store(0, Ordering::Release);
                Some(result)
            }
            Err(err) => {
                self.record_failure(operation, &err);
                None
            }
        }
    }

    fn record_failure(&self, operation: &'static str, err: &EngineError) {
        // A close raced with this call; the failure says nothing about the disk.
        if self.is_closed() {
            debug!(cache = %self.name, operation, error = %err, "operation failed on a closing cache");
            return;
        }

        let errors = self.io_errors.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::counter!(CACHE_IO_ERRORS, "cache" => self.name.clone()).increment(1);
        warn!(cache = %self.name, operation, errors, error = %err, "cache operation failed");

        if errors > self.io_error_threshold {
            error!(
                cache = %self.name,
                errors,
                threshold = self.io_error_threshold,
                "too many io errors; closing cache"
            );
            metrics::counter!(CACHE_CIRCUIT_BREAKS, "cache" => self.name.clone()).increment(1);
            self.close_from(CloseOrigin::CircuitBreaker);
        }
    }

    fn close_from(&self, origin: CloseOrigin) {
        if self.is_closed() {
            return;
        }
        if origin != CloseOrigin::CircuitBreaker {
            self.run_pre_close_hook();
        }

        let previous = self.state.swap(Arc::new(EngineState::Closed));
        let EngineState::Open(engine) = &*previous else {
            // Another caller won the swap and owns the close.
            return;
        };

        if origin != CloseOrigin::Sweep {
            self.unregister();
        }
        if let Err(err) = engine.close() {
            warn!(cache = %self.name, error = %err, "failed to close engine");
        }
        debug!(cache = %self.name, ?origin, "cache closed");
    }

    fn run_pre_close_hook(&self) {
        let hook = self.pre_close.lock().as_ref().and_then(Weak::upgrade);
        if let Some(hook) = hook {
            hook.flush_before_close();
        }
    }

    fn unregister(&self) {
        let Some(id) = self.registration.lock().take() else {
            return;
        };
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.name, id);
        }
    }
}

/// The bounded open loop. `None` means every attempt failed or a failure
/// could not be retried.
fn open_engine<K, V>(
    config: &CacheConfig,
    factory: &dyn EngineFactory<K, V>,
    location: &str,
) -> Option<Arc<dyn PersistentEngine<K, V>>> {
    let name = config.name.as_str();
    let attempts = config.max_open_attempts.max(1);

    for attempt in 1..=attempts {
        if attempt > 1 {
            thread::sleep(config.open_retry_delay());
        }

        let err = match factory.open() {
            Ok(engine) => {
                if attempt > 1 {
                    info!(cache = %name, location, attempt, "cache opened after retrying");
                }
                return Some(engine);
            }
            Err(err) => err,
        };

        match err.kind() {
            EngineErrorKind::VersionMismatch => {
                info!(cache = %name, location, attempt, error = %err, "stale cache format; deleting store files");
                factory.delete_files();
            }
            EngineErrorKind::Io => {
                warn!(cache = %name, location, attempt, error = %err, "failed to open cache; deleting store files");
                factory.delete_files();
            }
            EngineErrorKind::Other => {
                error!(cache = %name, location, attempt, error = %err, "failed to open cache; not retrying");
                return None;
            }
        }
    }

    error!(cache = %name, location, attempts, "giving up on opening cache; continuing with it closed");
    None
}

impl<K, V> ManagedCache<K, V> for DurableCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &K) -> Option<V> {
        self.with_engine("get", |engine| engine.get(key)).flatten()
    }

    fn set(&self, key: K, value: V) {
        self.with_engine("set", |engine| engine.put(&key, &value));
    }

    fn remove(&self, key: &K) {
        self.with_engine("remove", |engine| engine.remove(key));
    }

    fn force(&self) {
        self.with_engine("force", |engine| engine.force());
    }

    fn close(&self) {
        self.close_from(CloseOrigin::Owner);
    }

    fn is_closed(&self) -> bool {
        matches!(**self.state.load(), EngineState::Closed)
    }
}

impl<K, V> ShutdownTarget for DurableCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn close_for_shutdown(&self) {
        self.close_from(CloseOrigin::Sweep);
    }
}

impl<K, V> fmt::Debug for DurableCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableCache")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("closed", &matches!(**self.state.load(), EngineState::Closed))
            .field("io_errors", &self.io_errors.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
