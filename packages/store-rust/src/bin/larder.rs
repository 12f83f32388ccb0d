//! `larder`: inspect and edit a redb-backed cache store offline.
//!
//! Keys are strings and values are arbitrary JSON. Single-key commands go
//! straight through a durable cache; `load` streams a JSON object through
//! the write-back overlay with periodic maintenance running, the way a
//! long-lived host would use the store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use larder_core::thread::mark_primary_thread;
use larder_core::{CacheConfig, EngineFactory, ManagedCache};
use larder_store::storage::engines::{RedbEngineConfig, RedbEngineFactory};
use larder_store::telemetry::{init_tracing, LogFormat};
use larder_store::{
    spawn_periodic_maintenance, CacheFactory, DurableCache, MemoryPressureMonitor,
    ShutdownController,
};
use serde_json::Value;
use tracing::{info, warn};

type Engines = RedbEngineFactory<String, Value>;

/// Inspect and edit a larder cache store
#[derive(Parser, Debug)]
#[command(name = "larder", version)]
struct Args {
    /// redb store file
    #[arg(long, env = "LARDER_STORE")]
    store: PathBuf,

    /// Format version the store must carry; a mismatch wipes the store
    #[arg(long, default_value_t = 1, env = "LARDER_FORMAT_VERSION")]
    format_version: u32,

    /// Cache configuration (JSON). The cache name defaults to the store file stem
    #[arg(long, env = "LARDER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, default_value = "pretty", env = "LARDER_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY as JSON
    Get { key: String },
    /// Store VALUE under KEY; VALUE is parsed as JSON, or kept as a string
    Set { key: String, value: String },
    /// Delete KEY
    Remove { key: String },
    /// Print the number of stored entries
    Count,
    /// Bulk-load a JSON object of key/value pairs
    Load { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, "warn,larder_store=info")?;
    // Cache calls below run on the blocking pool, never on this thread.
    mark_primary_thread();

    let config = load_config(args.config.as_deref(), &args.store)?;
    let engines = Engines::new(RedbEngineConfig::new(&args.store, args.format_version));
    let controller = Arc::new(ShutdownController::new());

    let result = match args.command {
        Command::Load { file } => load(&controller, config, engines, &file).await,
        command => run_single(&controller, config, engines, command).await,
    };

    let closed = controller.shutdown().await;
    if closed > 0 {
        info!(closed, "closed caches left open");
    }
    result
}

fn load_config(path: Option<&Path>, store: &Path) -> anyhow::Result<CacheConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            CacheConfig::from_json(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => CacheConfig::default(),
    };
    if config.name.is_empty() {
        config.name = store
            .file_stem()
            .map_or_else(|| "larder".to_string(), |stem| stem.to_string_lossy().into_owned());
    }
    Ok(config)
}

async fn run_single(
    controller: &ShutdownController,
    config: CacheConfig,
    engines: Engines,
    command: Command,
) -> anyhow::Result<()> {
    let registry = controller.registry();
    tokio::task::spawn_blocking(move || {
        let cache = DurableCache::<String, Value>::open(&config, &engines, &registry);
        if cache.is_closed() {
            bail!("could not open cache store {}", engines.location());
        }
        let outcome = execute(&cache, command);
        cache.close();
        outcome
    })
    .await?
}

fn execute(cache: &DurableCache<String, Value>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key } => {
            let value = cache
                .get(&key)
                .with_context(|| format!("key {key:?} not found"))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Set { key, value } => {
            let value =
                serde_json::from_str::<Value>(&value).unwrap_or_else(|_| Value::String(value));
            cache.set(key, value);
            cache.force();
        }
        Command::Remove { key } => {
            cache.remove(&key);
            cache.force();
        }
        Command::Count => {
            let count = cache.keys_count().context("store could not be read")?;
            println!("{count}");
        }
        Command::Load { .. } => bail!("load runs through the overlay, not a single-key cache"),
    }
    if cache.is_closed() {
        bail!("store failed while running the command");
    }
    Ok(())
}

async fn load(
    controller: &Arc<ShutdownController>,
    config: CacheConfig,
    engines: Engines,
    file: &Path,
) -> anyhow::Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let entries: serde_json::Map<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON object", file.display()))?;
    let total = entries.len();
    let period = config.maintenance_period();

    let factory = CacheFactory::new(controller.registry());
    let cache = tokio::task::spawn_blocking(move || {
        factory.open::<String, Value>(&config, &engines)
    })
    .await?;
    if cache.is_closed() {
        bail!("could not open cache store");
    }

    let monitor = MemoryPressureMonitor::new();
    let cancel = controller.child_token();
    let maintenance =
        spawn_periodic_maintenance(Arc::clone(&cache), period, &monitor, cancel.clone());

    let writer = Arc::clone(&cache);
    let writes = tokio::task::spawn_blocking(move || {
        for (key, value) in entries {
            writer.set(key, value);
        }
    });

    tokio::select! {
        result = writes => result?,
        interrupted = Arc::clone(controller).shutdown_on_ctrl_c() => {
            interrupted?;
            warn!("load interrupted; buffered entries were flushed");
        }
    }

    // Maintenance performs the final flush and close.
    cancel.cancel();
    maintenance.await?;
    info!(entries = total, cache = %cache.name(), "load complete");
    Ok(())
}
