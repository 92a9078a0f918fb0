//! Remote API seam: the operations the engine needs from the backend.

pub mod client;
pub mod resources;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::sync::SyncAction;

pub use client::HttpApiClient;
pub use resources::{CriticalEndpoint, ResourceType};

/// Query parameters, kept sorted so they hash the same way every time.
pub type Params = BTreeMap<String, String>;

/// Remote operations provided by the backend.
///
/// The mutation calls are the dispatch targets of the sync queue and are
/// expected to be safe to repeat against the same entity.
#[async_trait]
pub trait ApiClient: Send + Sync {
  /// `completed_at` is when the user completed the task, not when the call
  /// is made.
  async fn complete_task(&self, id: &str, completed_at: Option<DateTime<Utc>>) -> Result<()>;

  async fn update_task(&self, id: &str, patch: &Value) -> Result<()>;

  async fn create_task(&self, data: &Value) -> Result<()>;

  async fn mark_notification_read(&self, id: &str) -> Result<()>;

  /// Generic read used by the fallback path and the critical refresh.
  async fn fetch(&self, endpoint: &str, params: &Params) -> Result<Value>;

  /// Lightweight reachability request used for quality probing.
  async fn ping(&self) -> Result<()>;
}

/// Delivers one queued mutation to the remote system.
#[async_trait]
pub trait Dispatcher: Send + Sync {
  async fn dispatch(&self, action: SyncAction, payload: &Value) -> Result<()>;
}

#[async_trait]
impl<A: ApiClient + ?Sized> Dispatcher for A {
  async fn dispatch(&self, action: SyncAction, payload: &Value) -> Result<()> {
    match action {
      SyncAction::CompleteTask => {
        let id = id_field(payload, "taskId")?;
        self.complete_task(&id, completed_at(payload)?).await
      }
      SyncAction::UpdateTask => {
        let id = id_field(payload, "taskId")?;
        let updates = payload
          .get("updates")
          .ok_or_else(|| eyre!("UPDATE_TASK payload has no 'updates'"))?;
        self.update_task(&id, updates).await
      }
      SyncAction::CreateTask => {
        let task = payload
          .get("task")
          .ok_or_else(|| eyre!("CREATE_TASK payload has no 'task'"))?;
        self.create_task(task).await
      }
      SyncAction::MarkNotificationRead => {
        self
          .mark_notification_read(&id_field(payload, "notificationId")?)
          .await
      }
    }
  }
}

/// Read an id that may be sent as a string or a number.
fn id_field(payload: &Value, field: &str) -> Result<String> {
  match payload.get(field) {
    Some(Value::String(s)) => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    _ => Err(eyre!("Payload has no '{}' field", field)),
  }
}

/// Completion time stamped on the payload at enqueue.
fn completed_at(payload: &Value) -> Result<Option<DateTime<Utc>>> {
  match payload.get("completedAt") {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
      .map(|t| Some(t.with_timezone(&Utc)))
      .map_err(|e| eyre!("Invalid completedAt '{}': {}", s, e)),
    Some(other) => Err(eyre!("completedAt must be a timestamp, got {}", other)),
  }
}
