//! [`PersistentEngine`](larder_core::PersistentEngine) implementations.
//!
//! Provides [`MemoryEngineFactory`] for ephemeral stores and fault-injection
//! tests, and (with the `redb` feature) [`RedbEngineFactory`] for file-backed
//! stores.

mod memory;
#[cfg(feature = "redb")]
mod redb;

pub use memory::{MemoryEngine, MemoryEngineFactory};
#[cfg(feature = "redb")]
pub use self::redb::{RedbEngine, RedbEngineConfig, RedbEngineFactory};
