//! Layered cache storage.
//!
//! Caches stack up to three layers:
//!
//! - **Engine** ([`engines`]): a [`PersistentEngine`](larder_core::PersistentEngine)
//!   holding the data on disk (or in memory)
//! - **Durable** ([`DurableCache`]): owns one engine; adds open retries, IO
//!   error circuit breaking and shutdown registration
//! - **Overlay** ([`HeapOverlayCache`]): bounded in-memory write-back layer
//!
//! [`CacheFactory`] wires the layers together from a
//! [`CacheConfig`](larder_core::CacheConfig).

pub mod durable;
pub mod engines;
pub mod factory;
pub mod overlay;

pub use durable::DurableCache;
pub use factory::CacheFactory;
pub use overlay::HeapOverlayCache;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use larder_core::{CacheConfig, EngineFactory, ManagedCache};

    use super::engines::MemoryEngineFactory;
    use super::*;
    use crate::lifecycle::ShutdownRegistry;

    type Engines = MemoryEngineFactory<String, u32>;

    fn config(name: &str, overlay_capacity: usize) -> CacheConfig {
        CacheConfig {
            overlay_capacity,
            open_retry_delay_ms: 0,
            ..CacheConfig::named(name)
        }
    }

    fn open(
        factory: &CacheFactory,
        engines: &dyn EngineFactory<String, u32>,
        name: &str,
        overlay_capacity: usize,
    ) -> Arc<dyn ManagedCache<String, u32>> {
        factory.open(&config(name, overlay_capacity), engines)
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn write_then_read_in_every_layout() {
        for capacity in [0, 1, 10] {
            let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
            let engines = Engines::new("layout");
            let cache = open(&factory, &engines, "layout", capacity);

            for i in 0..25_u32 {
                cache.set(format!("k{i}"), i);
                assert_eq!(cache.get(&format!("k{i}")), Some(i), "capacity {capacity}");
            }
            cache.close();
        }
    }

    #[test]
    fn delete_then_read_is_absent_before_force() {
        for capacity in [0, 4] {
            let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
            let engines = Engines::new("delete");
            let cache = open(&factory, &engines, "delete", capacity);

            cache.set(key("k"), 1);
            cache.remove(&key("k"));
            assert_eq!(cache.get(&key("k")), None, "capacity {capacity}");
            cache.close();
        }
    }

    #[test]
    fn one_key_past_capacity_writes_back_exactly_the_oldest() {
        const N: usize = 10;
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
        let engines = Engines::new("evict");
        let cache = open(&factory, &engines, "evict", N);

        for i in 0..=N {
            cache.set(format!("k{i}"), u32::try_from(i).unwrap());
        }

        assert_eq!(engines.put_count(), 1);
        assert_eq!(engines.len(), 1);
        assert_eq!(engines.stored(&key("k0")), Some(0));
    }

    #[test]
    fn force_makes_every_prior_write_visible_to_a_fresh_cache() {
        let registry = Arc::new(ShutdownRegistry::new());
        let factory = CacheFactory::new(Arc::clone(&registry));
        let engines = Engines::new("durable");

        // Opted out of the sweep so a second live instance may coexist.
        let first = factory.open::<String, u32>(
            &CacheConfig {
                close_on_shutdown: false,
                ..config("durable", 4)
            },
            &engines,
        );
        for i in 0..10_u32 {
            first.set(format!("k{i}"), i);
        }
        first.remove(&key("k3"));
        first.force();

        let fresh = open(&factory, &engines, "durable-reader", 4);
        for i in 0..10_u32 {
            let expected = (i != 3).then_some(i);
            assert_eq!(fresh.get(&format!("k{i}")), expected);
        }
        first.close();
        fresh.close();
    }

    #[test]
    fn closing_twice_is_a_no_op() {
        for capacity in [0, 4] {
            let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
            let engines = Engines::new("twice");
            let cache = open(&factory, &engines, "twice", capacity);
            cache.set(key("a"), 1);

            cache.close();
            let forces = engines.force_count();
            cache.close();

            assert!(cache.is_closed());
            assert_eq!(engines.force_count(), forces);
            assert_eq!(engines.open_engines(), 0);
        }
    }

    #[test]
    fn sustained_io_errors_close_the_overlay_cache() {
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
        let engines = Engines::new("failing");
        let cache = open(&factory, &engines, "failing", 4);

        engines.fail_next_operations(100);
        for i in 0..21 {
            assert_eq!(cache.get(&format!("miss{i}")), None);
        }
        assert!(cache.is_closed());

        cache.set(key("a"), 1);
        assert_eq!(cache.get(&key("a")), None);
        cache.force();
        cache.close();
        assert_eq!(engines.put_count(), 0);
    }

    #[test]
    fn concurrent_duplicates_leave_one_registered_survivor() {
        let registry = Arc::new(ShutdownRegistry::new());
        let factory = CacheFactory::new(Arc::clone(&registry));
        let engines = Arc::new(Engines::new("dup"));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let factory = factory.clone();
                let engines = Arc::clone(&engines);
                thread::spawn(move || open(&factory, &*engines, "dup", 2))
            })
            .collect();
        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(caches.iter().filter(|c| !c.is_closed()).count(), 1);
        assert_eq!(registry.names(), vec!["dup"]);
        assert_eq!(engines.open_engines(), 1);
    }

    /// Capacity two: the third write evicts `a` with write-back, `a` is then
    /// read back from the durable layer, and a reopened cache sees `b` and `c`.
    fn eviction_scenario(engines: &dyn EngineFactory<String, u32>) {
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));

        let cache = open(&factory, engines, "c", 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("c"), 3);
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.force();
        cache.close();

        let reopened = open(&factory, engines, "c", 2);
        assert!(!reopened.is_closed());
        assert_eq!(reopened.get(&key("b")), Some(2));
        assert_eq!(reopened.get(&key("c")), Some(3));
        assert_eq!(reopened.get(&key("a")), Some(1));
        reopened.close();
    }

    #[test]
    fn eviction_scenario_in_memory() {
        let engines = Engines::new("c");
        eviction_scenario(&engines);
        assert_eq!(engines.stored(&key("a")), Some(1));
        assert_eq!(engines.open_engines(), 0);
    }

    #[cfg(feature = "redb")]
    #[test]
    fn eviction_scenario_on_disk() {
        use super::engines::{RedbEngineConfig, RedbEngineFactory};

        let dir = tempfile::tempdir().unwrap();
        let engines =
            RedbEngineFactory::<String, u32>::new(RedbEngineConfig::new(dir.path().join("c.redb"), 1));
        eviction_scenario(&engines);
    }

    #[cfg(feature = "redb")]
    #[test]
    fn shutdown_sweep_persists_overlay_writes_on_disk() {
        use super::engines::{RedbEngineConfig, RedbEngineFactory};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.redb");
        let engines = RedbEngineFactory::<String, u32>::new(RedbEngineConfig::new(&path, 1));

        let registry = Arc::new(ShutdownRegistry::new());
        let cache = open(&CacheFactory::new(Arc::clone(&registry)), &engines, "sweep", 8);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        registry.sweep();
        assert!(cache.is_closed());

        let reader = open(
            &CacheFactory::new(Arc::new(ShutdownRegistry::new())),
            &engines,
            "sweep",
            0,
        );
        assert_eq!(reader.get(&key("a")), Some(1));
        assert_eq!(reader.get(&key("b")), Some(2));
        reader.close();
    }
}
