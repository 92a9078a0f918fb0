//! Local caching for offline support.
//!
//! This module provides the TTL-governed cache the display client falls back
//! on when the network is unavailable:
//! - A durable, partitioned [`Store`] (SQLite, or a no-op when storage is unavailable)
//! - A [`CacheLayer`] that stamps writes and rejects records past their max age
//! - Secondary index range queries over record partitions

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{NoopStore, SqliteStore, Store};
pub use traits::{CacheRecord, CacheResult, CacheSource, IndexValue, KeyRange};
