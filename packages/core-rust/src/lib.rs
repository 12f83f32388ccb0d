//! `Larder` Core: managed cache contract, persistent engine traits, codecs, and configuration.

pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod thread;

pub use cache::ManagedCache;
pub use codec::{CodecError, MsgPackCodec};
pub use config::CacheConfig;
pub use engine::{EngineError, EngineErrorKind, EngineFactory, PersistentEngine};
