use std::time::Duration;

use serde::Deserialize;

/// Default number of entries held by the heap overlay.
pub const DEFAULT_OVERLAY_CAPACITY: usize = 10;

/// Default IO error threshold before a cache closes itself.
pub const DEFAULT_IO_ERROR_THRESHOLD: u32 = 20;

/// Per-cache configuration.
///
/// Controls creation retries, circuit breaking, the in-memory overlay size,
/// and shutdown-sweep participation. Deserializable from JSON with
/// durations expressed in milliseconds; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Logical store name. Unique among shutdown-registered caches.
    pub name: String,
    /// Heap overlay capacity. 0 disables the overlay.
    pub overlay_capacity: usize,
    /// Whether the process-wide shutdown sweep should close this cache.
    pub close_on_shutdown: bool,
    /// Maximum number of attempts to open the backing engine.
    pub max_open_attempts: u32,
    /// Delay before every open attempt after the first, in milliseconds.
    pub open_retry_delay_ms: u64,
    /// IO errors tolerated before the cache closes itself.
    pub io_error_threshold: u32,
    /// Period of the background flush run by periodic maintenance, in milliseconds.
    pub maintenance_period_ms: u64,
}

impl CacheConfig {
    /// Creates a config with default settings for the named store.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a config from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or a field has the
    /// wrong type.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    #[must_use]
    pub fn maintenance_period(&self) -> Duration {
        Duration::from_millis(self.maintenance_period_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            overlay_capacity: DEFAULT_OVERLAY_CAPACITY,
            close_on_shutdown: true,
            max_open_attempts: 5,
            open_retry_delay_ms: 10,
            io_error_threshold: DEFAULT_IO_ERROR_THRESHOLD,
            maintenance_period_ms: 30_000,
        }
    }
}
