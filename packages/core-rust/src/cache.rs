//! The [`ManagedCache`] contract every cache consumer programs against.
//!
//! Implementations live in `larder-store`: a durable cache over a
//! [`PersistentEngine`](crate::engine::PersistentEngine) and a heap overlay
//! that adds a bounded write-back layer on top of it. The long-running
//! "flush on a timer, close on cancellation" operation needs an async
//! runtime and is provided there as `run_periodic_maintenance`.

/// Managed key-value cache with explicit flush and close.
///
/// All operations are synchronous, may block on disk IO, and must run off
/// the host's primary thread (see [`crate::thread`]). None of them report
/// errors: a failing backing store degrades to `None` reads and no-op
/// writes, and eventually to [`is_closed()`](ManagedCache::is_closed)
/// returning `true`.
///
/// Used as `Arc<dyn ManagedCache<K, V>>`.
pub trait ManagedCache<K, V>: Send + Sync {
    /// Logical name of the backing store.
    fn name(&self) -> &str;

    /// Look up a value. Returns `None` if absent, pending deletion, or closed.
    fn get(&self, key: &K) -> Option<V>;

    /// Unconditionally overwrite the value for `key`.
    ///
    /// Not durable until a later [`force()`](ManagedCache::force) or
    /// [`close()`](ManagedCache::close).
    fn set(&self, key: K, value: V);

    /// Logically delete `key`. Same durability contract as `set`.
    fn remove(&self, key: &K);

    /// Best-effort flush of all buffered mutations to stable storage.
    ///
    /// No-op once the cache is closed.
    fn force(&self);

    /// Flush and release all resources. Calling it again is a no-op.
    fn close(&self);

    /// Whether the cache has been closed, explicitly or by degradation.
    fn is_closed(&self) -> bool;
}
