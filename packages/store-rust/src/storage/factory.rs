//! Factory for creating fully-wired [`ManagedCache`] instances.
//!
//! [`CacheFactory`] is the dependency injection point that holds the
//! process-wide [`ShutdownRegistry`] and assembles, per [`CacheConfig`], a
//! [`DurableCache`] over the given engine and (unless the overlay is
//! disabled) a [`HeapOverlayCache`] on top of it.

use std::hash::Hash;
use std::sync::Arc;

use larder_core::{CacheConfig, EngineFactory, ManagedCache};
use tracing::debug;

use crate::lifecycle::ShutdownRegistry;
use crate::storage::durable::DurableCache;
use crate::storage::overlay::HeapOverlayCache;

/// Creates caches that share one shutdown registry.
#[derive(Debug, Clone)]
pub struct CacheFactory {
    registry: Arc<ShutdownRegistry>,
}

impl CacheFactory {
    /// Creates a factory registering caches with `registry`.
    #[must_use]
    pub fn new(registry: Arc<ShutdownRegistry>) -> Self {
        Self { registry }
    }

    /// The registry caches are registered with.
    #[must_use]
    pub fn registry(&self) -> &Arc<ShutdownRegistry> {
        &self.registry
    }

    /// Opens a cache over the engines produced by `engines`.
    ///
    /// `config.overlay_capacity == 0` returns the bare durable cache. Never
    /// fails; see [`DurableCache::open`] for how open errors degrade.
    pub fn open<K, V>(
        &self,
        config: &CacheConfig,
        engines: &dyn EngineFactory<K, V>,
    ) -> Arc<dyn ManagedCache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let durable = DurableCache::open(config, engines, &self.registry);
        if config.overlay_capacity == 0 {
            debug!(cache = %config.name, "opened durable cache without overlay");
            return durable;
        }
        debug!(
            cache = %config.name,
            capacity = config.overlay_capacity,
            "opened durable cache with heap overlay"
        );
        HeapOverlayCache::new(durable, config.overlay_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engines::MemoryEngineFactory;

    fn config(name: &str, overlay_capacity: usize) -> CacheConfig {
        CacheConfig {
            overlay_capacity,
            open_retry_delay_ms: 0,
            ..CacheConfig::named(name)
        }
    }

    #[test]
    fn zero_capacity_writes_straight_through() {
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
        let engines = MemoryEngineFactory::<String, u32>::new("plain");

        let cache = factory.open::<String, u32>(&config("plain", 0), &engines);
        cache.set("a".to_string(), 1);
        assert_eq!(engines.put_count(), 1);
        assert_eq!(cache.name(), "plain");
    }

    #[test]
    fn positive_capacity_buffers_writes() {
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
        let engines = MemoryEngineFactory::<String, u32>::new("buffered");

        let cache = factory.open::<String, u32>(&config("buffered", 4), &engines);
        cache.set("a".to_string(), 1);
        assert_eq!(engines.put_count(), 0);

        cache.force();
        assert_eq!(engines.stored(&"a".to_string()), Some(1));
    }

    #[test]
    fn caches_register_with_the_shared_registry() {
        let factory = CacheFactory::new(Arc::new(ShutdownRegistry::new()));
        let first = MemoryEngineFactory::<String, u32>::new("first");
        let second = MemoryEngineFactory::<String, u32>::new("second");

        let _a = factory.open::<String, u32>(&config("first", 2), &first);
        let _b = factory.open::<String, u32>(&config("second", 0), &second);
        assert_eq!(factory.registry().names(), vec!["first", "second"]);

        assert_eq!(factory.registry().sweep(), 2);
        assert_eq!(first.open_engines(), 0);
        assert_eq!(second.open_engines(), 0);
    }
}
