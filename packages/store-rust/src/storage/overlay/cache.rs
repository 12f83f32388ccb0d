use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use larder_core::thread::assert_off_primary_thread;
use larder_core::ManagedCache;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::debug;

use super::map::{CacheEntry, OverlayMap};
use crate::storage::durable::{DurableCache, PreCloseFlush};
use crate::telemetry::{OVERLAY_HITS, OVERLAY_MISSES, OVERLAY_WRITE_BACKS};

// ---------------------------------------------------------------------------
// HeapOverlayCache
// ---------------------------------------------------------------------------

/// Bounded write-back, read-through layer over a [`DurableCache`].
///
/// Writes land only in the overlay and reach the durable layer when their
/// entry is evicted, on [`force()`](ManagedCache::force), or on close. Reads
/// are served from the overlay and pulled up from the durable layer on a
/// miss. One reader-writer lock guards the overlay; hits take the read lock.
pub struct HeapOverlayCache<K, V> {
    durable: Arc<DurableCache<K, V>>,
    overlay: RwLock<OverlayMap<K, V>>,
    /// Set under the write lock once the final write-back ran; no dirty
    /// entry is admitted afterwards.
    sealed: AtomicBool,
}

impl<K, V> HeapOverlayCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Wraps `durable` with an overlay of `capacity` entries.
    ///
    /// The overlay also hooks into `durable` so that a shutdown sweep closing
    /// the durable cache writes back dirty overlay entries first.
    #[must_use]
    pub fn new(durable: Arc<DurableCache<K, V>>, capacity: usize) -> Arc<Self> {
        let cache = Arc::new(Self {
            durable,
            overlay: RwLock::new(OverlayMap::new(capacity)),
            sealed: AtomicBool::new(false),
        });
        let hook: Weak<Self> = Arc::downgrade(&cache);
        cache.durable.attach_pre_close(hook);
        cache
    }

    /// The wrapped durable cache.
    #[must_use]
    pub fn durable(&self) -> &Arc<DurableCache<K, V>> {
        &self.durable
    }

    /// Maximum number of overlay entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.overlay.read().capacity()
    }

    /// Entries currently held in memory.
    #[must_use]
    pub fn overlay_len(&self) -> usize {
        self.overlay.read().len()
    }

    /// Entries holding writes not yet passed to the durable layer.
    #[must_use]
    pub fn dirty_len(&self) -> usize {
        self.overlay
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .count()
    }

    /// Stores a dirty entry; `None` records a pending deletion.
    fn admit(&self, key: K, value: Option<V>) {
        if self.durable.is_closed() {
            return;
        }
        let mut overlay = self.overlay.write();
        // Re-checked under the lock: a close may have sealed the overlay
        // while this writer waited.
        if self.sealed.load(Ordering::Acquire) || self.durable.is_closed() {
            debug!(cache = %self.name(), "write discarded on closing cache");
            return;
        }
        overlay.insert(key, value, true, |key, entry| self.write_back(key, entry));
    }

    /// Passes `entry` to the durable layer if it is still dirty.
    fn write_back(&self, key: &K, entry: &CacheEntry<V>) {
        if !entry.take_dirty() {
            return;
        }
        match entry.value() {
            Some(value) => self.durable.set(key.clone(), value.clone()),
            None => self.durable.remove(key),
        }
        metrics::counter!(OVERLAY_WRITE_BACKS, "cache" => self.durable.name().to_string())
            .increment(1);
    }

    /// Writes back every dirty entry without clearing the overlay.
    fn write_back_all(&self) {
        let overlay = self.overlay.read();
        for (key, entry) in overlay.iter() {
            self.write_back(key, entry);
        }
    }

    /// Final write-back before the durable layer closes.
    ///
    /// Taking the write lock waits out write-backs that other threads claimed
    /// under the read lock, so none of them is still in flight when the
    /// engine closes.
    fn seal(&self) {
        let mut overlay = self.overlay.write();
        self.sealed.store(true, Ordering::Release);
        for (key, entry) in overlay.iter() {
            self.write_back(key, entry);
        }
        overlay.clear();
    }

    fn record_hit(&self) {
        metrics::counter!(OVERLAY_HITS, "cache" => self.durable.name().to_string()).increment(1);
    }
}

impl<K, V> ManagedCache<K, V> for HeapOverlayCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.durable.name()
    }

    fn get(&self, key: &K) -> Option<V> {
        assert_off_primary_thread("get");
        if self.durable.is_closed() {
            return None;
        }

        {
            let overlay = self.overlay.read();
            if let Some(entry) = overlay.lookup(key) {
                self.record_hit();
                return entry.value().cloned();
            }
        }

        // Upgradable: hits keep flowing while this miss loads, but only one
        // loader per overlay at a time, so a key is never loaded twice.
        let overlay = self.overlay.upgradable_read();
        if let Some(entry) = overlay.lookup(key) {
            self.record_hit();
            return entry.value().cloned();
        }
        metrics::counter!(OVERLAY_MISSES, "cache" => self.durable.name().to_string()).increment(1);

        let value = self.durable.get(key)?;
        let mut overlay = RwLockUpgradableReadGuard::upgrade(overlay);
        overlay.insert(key.clone(), Some(value.clone()), false, |key, entry| {
            self.write_back(key, entry);
        });
        Some(value)
    }

    fn set(&self, key: K, value: V) {
        assert_off_primary_thread("set");
        self.admit(key, Some(value));
    }

    fn remove(&self, key: &K) {
        assert_off_primary_thread("remove");
        self.admit(key.clone(), None);
    }

    fn force(&self) {
        assert_off_primary_thread("force");
        if self.durable.is_closed() {
            return;
        }
        self.write_back_all();
        self.durable.force();
    }

    fn close(&self) {
        assert_off_primary_thread("close");
        if self.durable.is_closed() {
            self.overlay.write().clear();
            return;
        }

        self.force();
        // Picks up writes that raced with the flush above.
        self.seal();
        self.durable.close();
        debug!(cache = %self.name(), "overlay cache closed");
    }

    fn is_closed(&self) -> bool {
        self.durable.is_closed()
    }
}

impl<K, V> PreCloseFlush for HeapOverlayCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn flush_before_close(&self) {
        self.seal();
    }
}

impl<K, V> fmt::Debug for HeapOverlayCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let overlay = self.overlay.read();
        f.debug_struct("HeapOverlayCache")
            .field("durable", &self.durable)
            .field("overlay_len", &overlay.len())
            .field("capacity", &overlay.capacity())
            .finish()
    }
}
