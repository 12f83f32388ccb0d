//! Process-wide registry of caches to close during the shutdown sweep.
//!
//! One [`ShutdownRegistry`] is created at startup (usually owned by the
//! [`ShutdownController`](super::ShutdownController)) and handed by `Arc` to
//! every durable cache. Names are unique: registering a second live cache
//! under the same name is refused so two owners never write the same files.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ShutdownTarget trait
// ---------------------------------------------------------------------------

/// A cache that the shutdown sweep can close.
pub trait ShutdownTarget: Send + Sync {
    /// Registration name (the cache's logical store name).
    fn name(&self) -> &str;

    /// Close without unregistering; the sweep clears the registry itself.
    fn close_for_shutdown(&self);
}

/// Identifies one successful registration.
///
/// Unregistering requires the id so a rejected duplicate cannot remove the
/// entry belonging to the cache that owns the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// Errors returned by [`ShutdownRegistry::register`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("cache {name:?} is already registered for shutdown; registered caches: {registered:?}")]
    Duplicate {
        name: String,
        registered: Vec<String>,
    },
    #[error("shutdown sweep already started; cache {name:?} was not registered")]
    ShuttingDown { name: String },
}

struct Registration {
    id: RegistrationId,
    target: Arc<dyn ShutdownTarget>,
}

// ---------------------------------------------------------------------------
// ShutdownRegistry
// ---------------------------------------------------------------------------

/// Concurrent set of caches needing a close at shutdown, keyed by name.
pub struct ShutdownRegistry {
    entries: DashMap<String, Registration>,
    next_id: AtomicU64,
    swept: AtomicBool,
}

impl ShutdownRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            swept: AtomicBool::new(false),
        }
    }

    /// Registers `target` under its name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] (listing every registered name)
    /// if the name is taken, or [`RegistryError::ShuttingDown`] once the
    /// sweep has started. The caller is expected to close the target.
    pub fn register(&self, target: Arc<dyn ShutdownTarget>) -> Result<RegistrationId, RegistryError> {
        let name = target.name().to_string();
        if self.is_swept() {
            return Err(RegistryError::ShuttingDown { name });
        }

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // The entry guard holds a shard lock; it must be released before
        // `names()` iterates the map below.
        let inserted = match self.entries.entry(name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Registration { id, target });
                true
            }
            Entry::Occupied(_) => false,
        };

        if !inserted {
            return Err(RegistryError::Duplicate {
                registered: self.names(),
                name,
            });
        }

        // A sweep that started while we were inserting may have missed us.
        if self.is_swept() {
            self.unregister(&name, id);
            return Err(RegistryError::ShuttingDown { name });
        }

        debug!(cache = %name, "registered cache for shutdown close");
        Ok(id)
    }

    /// Removes the registration for `name` if it is still owned by `id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, name: &str, id: RegistrationId) -> bool {
        self.entries
            .remove_if(name, |_, registration| registration.id == id)
            .is_some()
    }

    /// Sorted names of every registered cache.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether a cache is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered caches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no cache is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the shutdown sweep has started.
    #[must_use]
    pub fn is_swept(&self) -> bool {
        self.swept.load(Ordering::Acquire)
    }

    /// Closes every registered cache exactly once and empties the registry.
    ///
    /// Only the first call does any work; it returns the number of caches
    /// closed. Blocks on engine IO, so async callers should run it on a
    /// blocking thread.
    pub fn sweep(&self) -> usize {
        if self.swept.swap(true, Ordering::AcqRel) {
            return 0;
        }

        // Snapshot first: closing must not happen while shard locks are held.
        let targets: Vec<Arc<dyn ShutdownTarget>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.value().target))
            .collect();

        for target in &targets {
            debug!(cache = %target.name(), "closing cache during shutdown sweep");
            target.close_for_shutdown();
        }
        self.entries.clear();

        info!(closed = targets.len(), "shutdown sweep complete");
        targets.len()
    }
}

impl fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("names", &self.names())
            .field("swept", &self.is_swept())
            .finish()
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    /// Target that counts shutdown closes.
    struct CountingTarget {
        name: &'static str,
        closes: AtomicU32,
    }

    impl CountingTarget {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                closes: AtomicU32::new(0),
            })
        }

        fn closes(&self) -> u32 {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl ShutdownTarget for CountingTarget {
        fn name(&self) -> &str {
            self.name
        }

        fn close_for_shutdown(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_and_list_names() {
        let registry = ShutdownRegistry::new();
        registry.register(CountingTarget::new("stubs")).unwrap();
        registry.register(CountingTarget::new("outlines")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("stubs"));
        assert_eq!(registry.names(), vec!["outlines", "stubs"]);
    }

    #[test]
    fn duplicate_name_is_rejected_with_registered_list() {
        let registry = ShutdownRegistry::new();
        registry.register(CountingTarget::new("stubs")).unwrap();
        registry.register(CountingTarget::new("outlines")).unwrap();

        let err = registry.register(CountingTarget::new("stubs")).unwrap_err();
        match err {
            RegistryError::Duplicate { name, registered } => {
                assert_eq!(name, "stubs");
                assert_eq!(registered, vec!["outlines", "stubs"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_requires_owning_id() {
        let registry = ShutdownRegistry::new();
        let owner = registry.register(CountingTarget::new("stubs")).unwrap();
        let other = registry.register(CountingTarget::new("other")).unwrap();

        assert!(!registry.unregister("stubs", other));
        assert!(registry.contains("stubs"));

        assert!(registry.unregister("stubs", owner));
        assert!(!registry.contains("stubs"));
        assert!(!registry.unregister("stubs", owner));
    }

    #[test]
    fn name_is_reusable_after_unregister() {
        let registry = ShutdownRegistry::new();
        let id = registry.register(CountingTarget::new("stubs")).unwrap();
        registry.unregister("stubs", id);

        let second = registry.register(CountingTarget::new("stubs")).unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn sweep_closes_each_target_once() {
        let registry = ShutdownRegistry::new();
        let a = CountingTarget::new("a");
        let b = CountingTarget::new("b");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.sweep(), 0, "second sweep is a no-op");

        assert_eq!(a.closes(), 1);
        assert_eq!(b.closes(), 1);
        assert!(registry.is_empty());
        assert!(registry.is_swept());
    }

    #[test]
    fn register_after_sweep_is_refused() {
        let registry = ShutdownRegistry::new();
        registry.sweep();

        let err = registry.register(CountingTarget::new("late")).unwrap_err();
        assert!(matches!(err, RegistryError::ShuttingDown { ref name } if name == "late"));
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registration_keeps_exactly_one_owner() {
        let registry = Arc::new(ShutdownRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register(CountingTarget::new("shared")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
