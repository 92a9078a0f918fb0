//! Offline mutation queue.
//!
//! Mutations made while the display is offline (or online, for that matter)
//! are queued durably and delivered in order once the remote is reachable.
//! Tasks that keep failing are moved to a dead-letter area instead of being
//! dropped.

mod queue;
pub mod task;

pub use queue::{DrainReport, SyncQueue, DEFAULT_MAX_ATTEMPTS};
pub use task::{SyncAction, SyncTask, TaskId, TaskState};
