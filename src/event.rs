use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::network::ConnectionQuality;
use crate::sync::{SyncAction, TaskId};

/// Engine events, for hosts that want to react (status banners, telemetry)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
  QualityChanged(ConnectionQuality),
  /// A background or forced sync finished
  SyncCompleted {
    at: DateTime<Utc>,
    dispatched: usize,
    dead_lettered: usize,
    refreshed: usize,
    refresh_failed: usize,
  },
  /// A task ran out of attempts and left the queue
  TaskDeadLettered {
    id: TaskId,
    action: SyncAction,
    attempts: u32,
    last_error: String,
  },
  CacheSwept { removed: usize },
}

/// Fan-out of engine events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Publish an event. Having no subscribers is fine.
  pub fn emit(&self, event: EngineEvent) {
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(64)
  }
}
