//! File-backed [`PersistentEngine`] built on `redb`.
//!
//! Keys and values are stored as `MsgPack` bytes in a single `entries` table.
//! Mutations commit with `Durability::None` so bursts of writes stay cheap;
//! [`force()`](PersistentEngine::force) commits an `Immediate` transaction,
//! which makes every earlier commit durable. A `meta` table records the
//! caller's format version so stale files are detected on open.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use larder_core::{EngineError, EngineFactory, MsgPackCodec, PersistentEngine};
use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const META: TableDefinition<&str, u32> = TableDefinition::new("meta");
const FORMAT_VERSION_KEY: &str = "format_version";

/// Location and format version of a redb-backed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedbEngineConfig {
    /// Database file. Parent directories are created on open.
    pub path: PathBuf,
    /// Version of the caller's key/value encoding. Bump it whenever stored
    /// bytes written by an older release can no longer be decoded.
    pub format_version: u32,
}

impl RedbEngineConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, format_version: u32) -> Self {
        Self {
            path: path.into(),
            format_version,
        }
    }
}

/// Maps any redb error onto the engine error taxonomy.
fn engine_error(err: impl Into<redb::Error>) -> EngineError {
    match err.into() {
        redb::Error::Io(io) => EngineError::Io(io),
        redb::Error::UpgradeRequired(found) => {
            EngineError::VersionMismatch(format!("redb file format {found} requires an upgrade"))
        }
        err @ redb::Error::DatabaseAlreadyOpen => EngineError::Other(anyhow::anyhow!("{err}")),
        other => EngineError::Io(std::io::Error::other(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// RedbEngineFactory
// ---------------------------------------------------------------------------

/// Opens [`RedbEngine`]s for one database file.
pub struct RedbEngineFactory<K, V> {
    config: RedbEngineConfig,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedbEngineFactory<K, V> {
    #[must_use]
    pub fn new(config: RedbEngineConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Creates the tables and checks (or records) the format version.
    fn prepare(&self, db: &Database) -> Result<(), EngineError> {
        let expected = self.config.format_version;
        let txn = db.begin_write().map_err(engine_error)?;

        let stored = {
            let meta = txn.open_table(META).map_err(engine_error)?;
            let version = meta.get(FORMAT_VERSION_KEY).map_err(engine_error)?;
            version.map(|guard| guard.value())
        };

        match stored {
            Some(found) if found != expected => {
                txn.abort().map_err(engine_error)?;
                return Err(EngineError::VersionMismatch(format!(
                    "{} has format {found}, expected {expected}",
                    self.config.path.display()
                )));
            }
            Some(_) => {}
            None => {
                let mut meta = txn.open_table(META).map_err(engine_error)?;
                meta.insert(FORMAT_VERSION_KEY, expected)
                    .map_err(engine_error)?;
            }
        }

        txn.open_table(ENTRIES).map_err(engine_error)?;
        txn.commit().map_err(engine_error)
    }
}

impl<K, V> EngineFactory<K, V> for RedbEngineFactory<K, V>
where
    K: Serialize + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn location(&self) -> String {
        self.config.path.display().to_string()
    }

    fn open(&self) -> Result<Arc<dyn PersistentEngine<K, V>>, EngineError> {
        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&self.config.path).map_err(engine_error)?;
        self.prepare(&db)?;
        debug!(path = %self.config.path.display(), "opened redb store");

        Ok(Arc::new(RedbEngine {
            db: RwLock::new(Some(db)),
            _marker: PhantomData,
        }))
    }

    fn delete_files(&self) {
        let path = &self.config.path;
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        let Ok(entries) = fs::read_dir(parent) else {
            return;
        };

        let store = file_name.to_string_lossy().into_owned();
        for entry in entries.flatten() {
            if !is_store_file(&store, &entry.file_name().to_string_lossy()) {
                continue;
            }
            if let Err(err) = fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %err, "failed to delete store file");
            }
        }
    }
}

/// The database file itself or a sidecar named `<store>.<suffix>` or
/// `<store>-<suffix>`.
fn is_store_file(store: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(store) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') || rest.starts_with('-'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// RedbEngine
// ---------------------------------------------------------------------------

/// One open redb database.
pub struct RedbEngine<K, V> {
    /// `None` once closed; dropping the `Database` releases the file.
    db: RwLock<Option<Database>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedbEngine<K, V> {
    fn with_db<R>(
        &self,
        f: impl FnOnce(&Database) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(EngineError::Closed)?;
        f(db)
    }

    fn commit_durable(db: &Database) -> Result<(), EngineError> {
        let mut txn = db.begin_write().map_err(engine_error)?;
        txn.set_durability(Durability::Immediate);
        txn.commit().map_err(engine_error)
    }
}

impl<K, V> PersistentEngine<K, V> for RedbEngine<K, V>
where
    K: Serialize + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>, EngineError> {
        let key = MsgPackCodec::encode(key)?;
        self.with_db(|db| {
            let txn = db.begin_read().map_err(engine_error)?;
            let table = txn.open_table(ENTRIES).map_err(engine_error)?;
            let Some(bytes) = table.get(key.as_slice()).map_err(engine_error)? else {
                return Ok(None);
            };
            Ok(Some(MsgPackCodec::decode(bytes.value())?))
        })
    }

    fn put(&self, key: &K, value: &V) -> Result<(), EngineError> {
        let key = MsgPackCodec::encode(key)?;
        let value = MsgPackCodec::encode(value)?;
        self.with_db(|db| {
            let mut txn = db.begin_write().map_err(engine_error)?;
            txn.set_durability(Durability::None);
            {
                let mut table = txn.open_table(ENTRIES).map_err(engine_error)?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(engine_error)?;
            }
            txn.commit().map_err(engine_error)
        })
    }

    fn remove(&self, key: &K) -> Result<(), EngineError> {
        let key = MsgPackCodec::encode(key)?;
        self.with_db(|db| {
            let mut txn = db.begin_write().map_err(engine_error)?;
            txn.set_durability(Durability::None);
            {
                let mut table = txn.open_table(ENTRIES).map_err(engine_error)?;
                table.remove(key.as_slice()).map_err(engine_error)?;
            }
            txn.commit().map_err(engine_error)
        })
    }

    fn force(&self) -> Result<(), EngineError> {
        self.with_db(Self::commit_durable)
    }

    fn close(&self) -> Result<(), EngineError> {
        let Some(db) = self.db.write().take() else {
            return Ok(());
        };
        let result = Self::commit_durable(&db);
        drop(db);
        result
    }

    fn keys_count(&self) -> Result<u64, EngineError> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(engine_error)?;
            let table = txn.open_table(ENTRIES).map_err(engine_error)?;
            table.len().map_err(engine_error)
        })
    }
}
