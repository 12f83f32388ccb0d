//! Persistent engine collaborator traits and error classification.
//!
//! Defines [`PersistentEngine`], the durable key-value store a cache sits in
//! front of, and [`EngineFactory`], which opens engines and wipes their files
//! when the on-disk data is stale. Engines own key/value marshalling; the
//! cache layers only move typed keys and values.

use std::sync::Arc;

use crate::codec::CodecError;

/// Errors raised by a [`PersistentEngine`] or while opening one.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The on-disk format was written by an incompatible version.
    #[error("storage format version mismatch: {0}")]
    VersionMismatch(String),
    /// Underlying file or device failure.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes could not be decoded, or a value could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// The engine was closed while the call was in flight.
    #[error("engine is closed")]
    Closed,
    /// Anything else (misconfiguration, store already open elsewhere, ...).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by the cache creation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Stale on-disk format; recoverable by deleting the files.
    VersionMismatch,
    /// IO-like failure; recoverable by deleting the files and retrying.
    Io,
    /// Programming or configuration error; never retried.
    Other,
}

impl EngineError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            Self::VersionMismatch(_) => EngineErrorKind::VersionMismatch,
            Self::Io(_) | Self::Codec(_) | Self::Closed => EngineErrorKind::Io,
            Self::Other(_) => EngineErrorKind::Other,
        }
    }
}

/// Durable key-value map backed by files.
///
/// Implementations synchronize internally; every method takes `&self` so the
/// engine can be shared as `Arc<dyn PersistentEngine<K, V>>`. Any call may
/// fail with an IO-class [`EngineError`].
pub trait PersistentEngine<K, V>: Send + Sync {
    /// Retrieve the value for `key`, or `None` if not present.
    fn get(&self, key: &K) -> Result<Option<V>, EngineError>;

    /// Insert or replace the value for `key`.
    fn put(&self, key: &K, value: &V) -> Result<(), EngineError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &K) -> Result<(), EngineError>;

    /// Flush every previous mutation to stable storage.
    fn force(&self) -> Result<(), EngineError>;

    /// Flush and release file handles. Later calls fail with [`EngineError::Closed`].
    fn close(&self) -> Result<(), EngineError>;

    /// Number of live entries.
    fn keys_count(&self) -> Result<u64, EngineError>;
}

/// Opens [`PersistentEngine`] instances for one store location.
pub trait EngineFactory<K, V>: Send + Sync {
    /// Human-readable store location, used in log lines.
    fn location(&self) -> String;

    /// Open (or create) the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::VersionMismatch`] when the files on disk were
    /// written in an incompatible format, an IO-class error for file
    /// failures, and [`EngineError::Other`] for anything that retrying cannot
    /// fix.
    fn open(&self) -> Result<Arc<dyn PersistentEngine<K, V>>, EngineError>;

    /// Best-effort removal of every file belonging to the store.
    fn delete_files(&self);
}
