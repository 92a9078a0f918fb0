//! Connectivity state and connection quality sampling.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::event::{EngineEvent, EventBus};

/// Latency band of the most recent probe. Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
  Poor,
  Fair,
  Good,
  Excellent,
}

impl ConnectionQuality {
  /// Classify a successful probe's round trip.
  pub fn from_latency(latency: Duration) -> Self {
    match latency.as_millis() {
      0..=99 => ConnectionQuality::Excellent,
      100..=299 => ConnectionQuality::Good,
      300..=999 => ConnectionQuality::Fair,
      _ => ConnectionQuality::Poor,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ConnectionQuality::Poor => "poor",
      ConnectionQuality::Fair => "fair",
      ConnectionQuality::Good => "good",
      ConnectionQuality::Excellent => "excellent",
    }
  }
}

impl fmt::Display for ConnectionQuality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Host-provided online/offline signal.
///
/// Subscribers get a watch receiver; every change of the flag is an
/// online/offline event.
pub trait ConnectivitySource: Send + Sync {
  fn subscribe(&self) -> watch::Receiver<bool>;

  fn is_online(&self) -> bool {
    *self.subscribe().borrow()
  }
}

/// Connectivity flag set explicitly by the host.
#[derive(Debug)]
pub struct ManualConnectivity {
  tx: watch::Sender<bool>,
}

impl ManualConnectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _) = watch::channel(online);
    Self { tx }
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      let changed = *current != online;
      *current = online;
      changed
    });
  }
}

impl ConnectivitySource for ManualConnectivity {
  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }
}

/// An online/offline edge observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  Online,
  Offline,
}

/// Tracks connectivity and probes connection quality while online.
pub struct NetworkMonitor {
  connectivity: Arc<dyn ConnectivitySource>,
  api: Arc<dyn ApiClient>,
  events: EventBus,
  quality: watch::Sender<ConnectionQuality>,
  probe_interval: Duration,
  /// Kept shorter than regular API timeouts
  probe_timeout: Duration,
}

impl NetworkMonitor {
  pub fn new(
    connectivity: Arc<dyn ConnectivitySource>,
    api: Arc<dyn ApiClient>,
    events: EventBus,
  ) -> Self {
    let (quality, _) = watch::channel(ConnectionQuality::Poor);
    Self {
      connectivity,
      api,
      events,
      quality,
      probe_interval: Duration::from_secs(30),
      probe_timeout: Duration::from_secs(2),
    }
  }

  pub fn with_probe(mut self, interval: Duration, timeout: Duration) -> Self {
    self.probe_interval = interval;
    self.probe_timeout = timeout;
    self
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn quality(&self) -> ConnectionQuality {
    *self.quality.borrow()
  }

  pub fn watch_quality(&self) -> watch::Receiver<ConnectionQuality> {
    self.quality.subscribe()
  }

  /// Time one ping under the probe timeout. Failures and timeouts are `Poor`.
  pub async fn measure(&self) -> ConnectionQuality {
    let started = Instant::now();
    match tokio::time::timeout(self.probe_timeout, self.api.ping()).await {
      Ok(Ok(())) => ConnectionQuality::from_latency(started.elapsed()),
      Ok(Err(e)) => {
        debug!(error = %e, "Connection quality check failed");
        ConnectionQuality::Poor
      }
      Err(_) => {
        debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Connection probe timed out");
        ConnectionQuality::Poor
      }
    }
  }

  /// Measure and record the connection quality.
  pub async fn probe(&self) -> ConnectionQuality {
    let quality = self.measure().await;
    self.set_quality(quality);
    quality
  }

  fn set_quality(&self, quality: ConnectionQuality) {
    let previous = self.quality.send_replace(quality);
    if previous != quality {
      debug!(%quality, "Connection quality changed");
      self.events.emit(EngineEvent::QualityChanged(quality));
    }
  }

  /// Watch the connectivity signal and probe on a fixed cadence while online.
  ///
  /// Edges are forwarded on `transitions`. Going offline drops the quality
  /// to `Poor` and pauses probing until the signal comes back.
  pub async fn run(&self, transitions: mpsc::UnboundedSender<Transition>, cancel: CancellationToken) {
    let mut signal = self.connectivity.subscribe();
    let mut online = *signal.borrow_and_update();
    if !online {
      self.set_quality(ConnectionQuality::Poor);
    }

    let mut probe_tick = tokio::time::interval(self.probe_interval);
    probe_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,

        changed = signal.changed() => {
          if changed.is_err() {
            debug!("Connectivity source dropped");
            cancel.cancelled().await;
            break;
          }
          let now_online = *signal.borrow_and_update();
          if now_online == online {
            continue;
          }
          online = now_online;

          if online {
            info!("Network: Online");
            probe_tick.reset_immediately();
            self.events.emit(EngineEvent::Online);
            let _ = transitions.send(Transition::Online);
          } else {
            info!("Network: Offline");
            self.set_quality(ConnectionQuality::Poor);
            self.events.emit(EngineEvent::Offline);
            let _ = transitions.send(Transition::Offline);
          }
        }

        _ = probe_tick.tick(), if online => {
          tokio::select! {
            _ = cancel.cancelled() => break,
            quality = self.measure() => self.set_quality(quality),
          }
        }
      }
    }

    debug!("Network monitor stopped");
  }
}
