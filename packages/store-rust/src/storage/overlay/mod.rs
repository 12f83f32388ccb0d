//! Heap overlay: a bounded write-back layer over a durable cache.
//!
//! [`HeapOverlayCache`] absorbs bursts of writes in memory. Entries are
//! tagged dirty or clean; dirty entries are written back to the wrapped
//! [`DurableCache`](super::DurableCache) when evicted, flushed or closed.
//! Eviction is least-recently-used: lookups, writes and deletions all
//! refresh an entry.

mod cache;
mod map;

pub use cache::HeapOverlayCache;
