//! Background tasks: connectivity monitoring, periodic sync and cache cleanup.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::OfflineEngine;
use crate::network::Transition;

/// Running background tasks. Dropping it leaves them running; call
/// [`shutdown`](Self::shutdown).
pub struct SchedulerHandle {
  cancel: CancellationToken,
  tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Cancel every task and wait for them to finish.
  pub async fn shutdown(self) {
    self.cancel.cancel();
    for task in self.tasks {
      if let Err(e) = task.await {
        warn!(error = %e, "Background task ended abnormally");
      }
    }
    debug!("Scheduler stopped");
  }
}

pub struct Scheduler;

impl Scheduler {
  pub fn spawn(engine: Arc<OfflineEngine>) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let settings = engine.settings().clone();

    let monitor = engine.monitor();
    let monitor_task = tokio::spawn({
      let cancel = cancel.clone();
      async move { monitor.run(tx, cancel).await }
    });

    let sync_task = tokio::spawn(sync_loop(
      engine.clone(),
      rx,
      settings.sync_interval,
      cancel.clone(),
    ));

    let cleanup_task = tokio::spawn(cleanup_loop(
      engine,
      settings.cleanup_interval,
      cancel.clone(),
    ));

    SchedulerHandle {
      cancel,
      tasks: vec![monitor_task, sync_task, cleanup_task],
    }
  }
}

/// Sync on every tick and on each reconnect. Ticks missed while a sync runs
/// are dropped.
async fn sync_loop(
  engine: Arc<OfflineEngine>,
  mut transitions: mpsc::UnboundedReceiver<Transition>,
  period: Duration,
  cancel: CancellationToken,
) {
  let mut tick = interval_at(Instant::now() + period, period);
  tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,

      Some(transition) = transitions.recv() => {
        if transition == Transition::Online {
          tokio::select! {
            _ = cancel.cancelled() => break,
            _ = engine.on_online() => {}
          }
        }
      }

      _ = tick.tick() => {
        tokio::select! {
          _ = cancel.cancelled() => break,
          result = engine.background_sync() => {
            if let Err(e) = result {
              warn!(error = %e, "Background sync failed");
            }
          }
        }
      }
    }
  }
}

async fn cleanup_loop(engine: Arc<OfflineEngine>, period: Duration, cancel: CancellationToken) {
  let mut tick = interval_at(Instant::now() + period, period);
  tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = tick.tick() => {
        if let Err(e) = engine.cleanup() {
          warn!(error = %e, "Cache cleanup failed");
        }
      }
    }
  }
}
