//! In-memory [`PersistentEngine`] backed by [`DashMap`].
//!
//! Every engine opened by one [`MemoryEngineFactory`] shares the factory's
//! backing map, so reopening a cache observes what the previous instance
//! wrote, the way reopening a file would. The factory also injects faults
//! (failing opens or individual operations) and counts engine calls, which
//! is what the cache layers are tested against.

use std::collections::VecDeque;
use std::hash::Hash;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use larder_core::{EngineError, EngineErrorKind, EngineFactory, PersistentEngine};
use parking_lot::Mutex;

/// State shared by a factory and every engine it opened.
struct Backing<K, V> {
    entries: DashMap<K, V>,
    /// Number of upcoming engine operations that fail with an IO error.
    failing_operations: AtomicU32,
    /// Outcomes for upcoming `open()` calls, consumed front to back.
    failing_opens: Mutex<VecDeque<EngineErrorKind>>,
    open_engines: AtomicUsize,
    opens: AtomicU64,
    puts: AtomicU64,
    removes: AtomicU64,
    forces: AtomicU64,
    deletions: AtomicU64,
}

impl<K: Eq + Hash, V> Backing<K, V> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            failing_operations: AtomicU32::new(0),
            failing_opens: Mutex::new(VecDeque::new()),
            open_engines: AtomicUsize::new(0),
            opens: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            forces: AtomicU64::new(0),
            deletions: AtomicU64::new(0),
        }
    }

    /// Consumes one injected operation failure, if any are pending.
    fn injected_failure(&self) -> Result<(), EngineError> {
        let consumed = self
            .failing_operations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(EngineError::Io(io::Error::other("injected io failure")))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryEngineFactory
// ---------------------------------------------------------------------------

/// Opens [`MemoryEngine`]s over one shared in-memory store.
pub struct MemoryEngineFactory<K, V> {
    name: String,
    backing: Arc<Backing<K, V>>,
}

impl<K, V> MemoryEngineFactory<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty store; `name` only appears in log lines.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backing: Arc::new(Backing::new()),
        }
    }

    /// Reads a value straight from the store, bypassing any cache layer.
    #[must_use]
    pub fn stored(&self, key: &K) -> Option<V> {
        self.backing.entries.get(key).map(|v| v.clone())
    }

    /// Number of entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backing.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backing.entries.is_empty()
    }

    /// Makes the next `count` engine operations fail with an IO error.
    pub fn fail_next_operations(&self, count: u32) {
        self.backing.failing_operations.store(count, Ordering::Release);
    }

    /// Makes upcoming `open()` calls fail with the given kinds, in order.
    pub fn fail_next_opens(&self, kinds: impl IntoIterator<Item = EngineErrorKind>) {
        self.backing.failing_opens.lock().extend(kinds);
    }

    /// Engines opened and not yet closed.
    #[must_use]
    pub fn open_engines(&self) -> usize {
        self.backing.open_engines.load(Ordering::Acquire)
    }

    /// Total `open()` calls, successful or not.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.backing.opens.load(Ordering::Relaxed)
    }

    /// Successful `put` calls.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.backing.puts.load(Ordering::Relaxed)
    }

    /// Successful `remove` calls.
    #[must_use]
    pub fn remove_count(&self) -> u64 {
        self.backing.removes.load(Ordering::Relaxed)
    }

    /// Successful `force` calls.
    #[must_use]
    pub fn force_count(&self) -> u64 {
        self.backing.forces.load(Ordering::Relaxed)
    }

    /// Times the store's files were deleted.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.backing.deletions.load(Ordering::Relaxed)
    }
}

impl<K, V> EngineFactory<K, V> for MemoryEngineFactory<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn open(&self) -> Result<Arc<dyn PersistentEngine<K, V>>, EngineError> {
        self.backing.opens.fetch_add(1, Ordering::Relaxed);
        let injected = self.backing.failing_opens.lock().pop_front();
        match injected {
            Some(EngineErrorKind::VersionMismatch) => {
                return Err(EngineError::VersionMismatch(format!(
                    "injected for {}",
                    self.location()
                )));
            }
            Some(EngineErrorKind::Io) => {
                return Err(EngineError::Io(io::Error::other("injected open failure")));
            }
            Some(EngineErrorKind::Other) => {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "{} is already open elsewhere",
                    self.location()
                )));
            }
            None => {}
        }

        self.backing.open_engines.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemoryEngine {
            backing: Arc::clone(&self.backing),
            closed: AtomicBool::new(false),
        }))
    }

    fn delete_files(&self) {
        self.backing.entries.clear();
        self.backing.deletions.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// One open handle over a [`MemoryEngineFactory`]'s store.
pub struct MemoryEngine<K, V> {
    backing: Arc<Backing<K, V>>,
    closed: AtomicBool,
}

impl<K: Eq + Hash, V> MemoryEngine<K, V> {
    fn check(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        self.backing.injected_failure()
    }
}

impl<K, V> PersistentEngine<K, V> for MemoryEngine<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, EngineError> {
        self.check()?;
        Ok(self.backing.entries.get(key).map(|v| v.clone()))
    }

    fn put(&self, key: &K, value: &V) -> Result<(), EngineError> {
        self.check()?;
        self.backing.entries.insert(key.clone(), value.clone());
        self.backing.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<(), EngineError> {
        self.check()?;
        self.backing.entries.remove(key);
        self.backing.removes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn force(&self) -> Result<(), EngineError> {
        self.check()?;
        self.backing.forces.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.backing.open_engines.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn keys_count(&self) -> Result<u64, EngineError> {
        self.check()?;
        Ok(self.backing.entries.len() as u64)
    }
}
