//! Offline-first cache and sync engine for dashboard display clients.
//!
//! Reads go through [`OfflineEngine::fetch_with_fallback`], which prefers
//! live data and falls back to a TTL-bounded local cache. Mutations are
//! queued durably with [`OfflineEngine::enqueue`] and delivered in order once
//! connectivity allows.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod network;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, Dispatcher, HttpApiClient, Params, ResourceType};
pub use cache::{CacheRecord, CacheResult, CacheSource, KeyRange};
pub use config::Config;
pub use db::Partition;
pub use engine::{EngineDeps, EngineSettings, EngineStatus, OfflineEngine, SyncSummary};
pub use error::EngineError;
pub use event::EngineEvent;
pub use network::{ConnectionQuality, ConnectivitySource, ManualConnectivity};
pub use sync::{SyncAction, SyncTask, TaskId, TaskState};
