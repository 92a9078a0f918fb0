//! Durable FIFO of mutation intents with bounded retry.

use color_eyre::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::Dispatcher;
use crate::cache::Store;
use crate::clock::Clock;
use crate::event::{EngineEvent, EventBus};

use super::task::{SyncAction, SyncTask, TaskId};

/// Failed dispatches a task may accumulate before it is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Another drain was already running; nothing was done
  pub skipped: bool,
  /// Delivered and removed
  pub dispatched: usize,
  /// Failed but still queued
  pub retrying: usize,
  /// Failed for the last time and moved to the dead-letter area
  pub dead_lettered: usize,
}

/// Releases the drain latch however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Ordered holding area for mutations awaiting delivery.
///
/// Tasks are delivered in insertion order across the whole queue. Only one
/// drain runs at a time; an overlapping call returns immediately.
pub struct SyncQueue {
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
  events: EventBus,
  max_attempts: u32,
  draining: AtomicBool,
  closed: AtomicBool,
}

impl SyncQueue {
  pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
    Self {
      store,
      clock,
      events,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      draining: AtomicBool::new(false),
      closed: AtomicBool::new(false),
    }
  }

  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts.max(1);
    self
  }

  /// Append a mutation. It is kept regardless of connectivity.
  ///
  /// Completions are stamped with `completedAt` unless the caller set one.
  pub fn enqueue(&self, action: SyncAction, mut payload: Value) -> Result<TaskId> {
    let now = self.clock.now();
    if action == SyncAction::CompleteTask {
      if let Some(fields) = payload.as_object_mut() {
        fields
          .entry("completedAt")
          .or_insert_with(|| Value::String(now.to_rfc3339()));
      }
    }
    let id = self.store.push_task(action, &payload, now)?;
    debug!(id, action = %action, "Queued sync task");
    Ok(id)
  }

  /// Queued tasks in delivery order.
  pub fn pending(&self) -> Result<Vec<SyncTask>> {
    self.store.pending_tasks()
  }

  pub fn depth(&self) -> Result<u64> {
    self.store.queue_depth()
  }

  pub fn dead_letters(&self) -> Result<Vec<SyncTask>> {
    self.store.dead_letters()
  }

  /// Put a dead-lettered task back at the tail of the queue.
  pub fn replay(&self, id: TaskId) -> Result<Option<TaskId>> {
    let new_id = self.store.replay_dead_letter(id, self.clock.now())?;
    if let Some(new_id) = new_id {
      info!(id, new_id, "Dead letter replayed");
    }
    Ok(new_id)
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Stop any running drain before its next dispatch and refuse new ones.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Deliver every queued task in order.
  ///
  /// Success removes the task. Failure bumps and persists its attempt
  /// counter; on reaching the attempt ceiling the task is dead-lettered and a
  /// [`EngineEvent::TaskDeadLettered`] is emitted. A failing task does not
  /// hold back the ones behind it. Store errors abort the pass.
  pub async fn drain<D: Dispatcher + ?Sized>(&self, dispatcher: &D) -> Result<DrainReport> {
    if self.is_closed() {
      return Ok(DrainReport {
        skipped: true,
        ..Default::default()
      });
    }
    if self
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("Drain already in progress, skipping");
      return Ok(DrainReport {
        skipped: true,
        ..Default::default()
      });
    }
    let _guard = DrainGuard(&self.draining);

    let tasks = self.store.pending_tasks()?;
    if tasks.is_empty() {
      return Ok(DrainReport::default());
    }
    info!(count = tasks.len(), "Processing sync queue");

    let mut report = DrainReport::default();
    for task in tasks {
      if self.is_closed() {
        debug!("Queue closed mid-drain, stopping");
        break;
      }

      let result = dispatcher.dispatch(task.action, &task.payload).await;

      // Results are not written back once shutdown has begun
      if self.is_closed() {
        break;
      }

      match result {
        Ok(()) => {
          self.store.remove_task(task.id)?;
          report.dispatched += 1;
          debug!(id = task.id, action = %task.action, "Sync task delivered");
        }
        Err(e) => {
          let attempts = task.attempts() + 1;
          let error = e.to_string();
          self.store.record_failure(task.id, attempts, &error)?;

          if attempts >= self.max_attempts {
            self.store.dead_letter(task.id, self.clock.now())?;
            report.dead_lettered += 1;
            warn!(
              id = task.id,
              action = %task.action,
              attempts,
              error = %error,
              "Sync task dead-lettered after exhausting retries"
            );
            self.events.emit(EngineEvent::TaskDeadLettered {
              id: task.id,
              action: task.action,
              attempts,
              last_error: error,
            });
          } else {
            report.retrying += 1;
            warn!(id = task.id, action = %task.action, attempts, error = %error, "Sync task failed");
          }
        }
      }
    }

    info!(
      dispatched = report.dispatched,
      retrying = report.retrying,
      dead_lettered = report.dead_lettered,
      "Sync queue processed"
    );
    Ok(report)
  }
}
