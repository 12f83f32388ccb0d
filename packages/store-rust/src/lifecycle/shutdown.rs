//! Shutdown controller driving the cache shutdown sweep.
//!
//! Uses `ArcSwap` for lock-free lifecycle state transitions and a
//! `CancellationToken` tree so background maintenance tasks observe shutdown.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::registry::ShutdownRegistry;

/// Process lifecycle state, transitioned by the shutdown controller.
///
/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Caches may be opened and used.
    Running,
    /// Shutdown was triggered; maintenance tasks are cancelled and the
    /// sweep is closing registered caches.
    Draining,
    /// Every registered cache has been closed.
    Stopped,
}

/// Coordinates process shutdown for every managed cache.
///
/// 1. Hosts hand [`registry()`](Self::registry) to the cache factory
/// 2. Maintenance tasks run with a [`child_token()`](Self::child_token)
/// 3. `trigger_shutdown()` cancels those tasks and runs the registry sweep once
#[derive(Debug)]
pub struct ShutdownController {
    registry: Arc<ShutdownRegistry>,
    cancel: CancellationToken,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl ShutdownController {
    /// Creates a controller with a fresh registry, in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ShutdownRegistry::new()))
    }

    /// Creates a controller around an existing registry.
    #[must_use]
    pub fn with_registry(registry: Arc<ShutdownRegistry>) -> Self {
        Self {
            registry,
            cancel: CancellationToken::new(),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Running)),
        }
    }

    /// Returns the shared registry that caches register with.
    #[must_use]
    pub fn registry(&self) -> Arc<ShutdownRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns a token cancelled when shutdown is triggered.
    ///
    /// Background tasks (periodic maintenance) select on it to run their
    /// final flush and close.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels background tasks and closes every registered cache.
    ///
    /// Blocks on engine IO. Only the first call sweeps; later calls return 0.
    pub fn trigger_shutdown(&self) -> usize {
        self.state.store(Arc::new(LifecycleState::Draining));
        self.cancel.cancel();
        let closed = self.registry.sweep();
        self.state.store(Arc::new(LifecycleState::Stopped));
        closed
    }

    /// Async variant of [`trigger_shutdown`](Self::trigger_shutdown) that
    /// runs the sweep on the blocking pool.
    pub async fn shutdown(self: &Arc<Self>) -> usize {
        let controller = Arc::clone(self);
        match tokio::task::spawn_blocking(move || controller.trigger_shutdown()).await {
            Ok(closed) => closed,
            Err(err) => {
                warn!(error = %err, "shutdown sweep task failed");
                0
            }
        }
    }

    /// Waits for Ctrl-C, then shuts down.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be installed.
    pub async fn shutdown_on_ctrl_c(self: Arc<Self>) -> std::io::Result<usize> {
        tokio::signal::ctrl_c().await?;
        info!("interrupt received; closing caches");
        Ok(self.shutdown().await)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
