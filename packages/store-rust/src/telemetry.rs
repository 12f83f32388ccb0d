//! Logging setup and metric names.
//!
//! Library code only emits `tracing` events and `metrics` counters; installing
//! a subscriber or a metrics recorder is the host's job. [`init_tracing`] is
//! the setup used by the `larder` binary.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Engine errors swallowed by a durable cache. Labelled by `cache`.
pub const CACHE_IO_ERRORS: &str = "larder_cache_io_errors_total";
/// Durable caches closed by the IO error circuit breaker. Labelled by `cache`.
pub const CACHE_CIRCUIT_BREAKS: &str = "larder_cache_circuit_breaks_total";
/// Durable caches that failed every open attempt. Labelled by `cache`.
pub const CACHE_OPEN_FAILURES: &str = "larder_cache_open_failures_total";
/// Overlay lookups answered from memory. Labelled by `cache`.
pub const OVERLAY_HITS: &str = "larder_cache_overlay_hits_total";
/// Overlay lookups that went to the durable layer. Labelled by `cache`.
pub const OVERLAY_MISSES: &str = "larder_cache_overlay_misses_total";
/// Dirty overlay entries written back to the durable layer. Labelled by `cache`.
pub const OVERLAY_WRITE_BACKS: &str = "larder_cache_overlay_write_backs_total";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?} (expected pretty or json)")),
        }
    }
}

/// Installs a global `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, falling back to `default_filter`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
