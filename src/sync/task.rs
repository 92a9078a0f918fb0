//! Sync task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Store-assigned, queue-scoped task id. Monotonically increasing.
pub type TaskId = i64;

/// Mutation intents the display client can queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
  /// payload: `{ "taskId": ... }`
  CompleteTask,
  /// payload: `{ "taskId": ..., "updates": {...} }`
  UpdateTask,
  /// payload: `{ "task": {...} }`
  CreateTask,
  /// payload: `{ "notificationId": ... }`
  MarkNotificationRead,
}

impl SyncAction {
  pub fn as_str(self) -> &'static str {
    match self {
      SyncAction::CompleteTask => "COMPLETE_TASK",
      SyncAction::UpdateTask => "UPDATE_TASK",
      SyncAction::CreateTask => "CREATE_TASK",
      SyncAction::MarkNotificationRead => "MARK_NOTIFICATION_READ",
    }
  }
}

impl fmt::Display for SyncAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncAction {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_uppercase().replace('-', "_");
    match normalized.as_str() {
      "COMPLETE_TASK" => Ok(SyncAction::CompleteTask),
      "UPDATE_TASK" => Ok(SyncAction::UpdateTask),
      "CREATE_TASK" => Ok(SyncAction::CreateTask),
      "MARK_NOTIFICATION_READ" => Ok(SyncAction::MarkNotificationRead),
      _ => Err(format!("unknown sync action '{}'", s)),
    }
  }
}

/// Where a task stands in its delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TaskState {
  /// Never dispatched, or not yet failed
  Pending,
  /// Failed at least once, still in the queue
  Retrying { attempts: u32, last_error: String },
  /// Retry budget exhausted; kept out of the queue for inspection
  DeadLettered {
    attempts: u32,
    last_error: String,
    at: DateTime<Utc>,
  },
}

/// A queued mutation intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
  pub id: TaskId,
  pub action: SyncAction,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  pub state: TaskState,
}

impl SyncTask {
  /// Failed dispatches so far.
  pub fn attempts(&self) -> u32 {
    match &self.state {
      TaskState::Pending => 0,
      TaskState::Retrying { attempts, .. } | TaskState::DeadLettered { attempts, .. } => *attempts,
    }
  }

  pub fn last_error(&self) -> Option<&str> {
    match &self.state {
      TaskState::Pending => None,
      TaskState::Retrying { last_error, .. } | TaskState::DeadLettered { last_error, .. } => {
        Some(last_error)
      }
    }
  }

  pub fn is_dead_lettered(&self) -> bool {
    matches!(self.state, TaskState::DeadLettered { .. })
  }

  /// Rebuild the state from the queue row columns.
  pub(crate) fn queued_state(attempts: u32, last_error: Option<String>) -> TaskState {
    match (attempts, last_error) {
      (0, _) => TaskState::Pending,
      (attempts, last_error) => TaskState::Retrying {
        attempts,
        last_error: last_error.unwrap_or_default(),
      },
    }
  }
}
