//! Offline engine: ties the store, cache, sync queue and network monitor
//! together behind the operations the display client uses.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::resources::critical_set;
use crate::api::{ApiClient, Params, ResourceType};
use crate::cache::{CacheLayer, CacheRecord, CacheResult, NoopStore, SqliteStore, Store};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{Database, Partition};
use crate::error::EngineError;
use crate::event::{EngineEvent, EventBus};
use crate::network::{ConnectionQuality, ConnectivitySource, NetworkMonitor};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::sync::{SyncAction, SyncQueue, SyncTask, TaskId};

/// Settings key holding the time of the last completed sync.
pub const LAST_SYNC_TIME: &str = "lastSyncTime";

/// Timing and retry knobs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
  pub sync_interval: Duration,
  pub cleanup_interval: Duration,
  pub max_cache_age: chrono::Duration,
  pub max_attempts: u32,
  pub probe_interval: Duration,
  pub probe_timeout: Duration,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      sync_interval: Duration::from_secs(5 * 60),
      cleanup_interval: Duration::from_secs(60 * 60),
      max_cache_age: chrono::Duration::hours(24),
      max_attempts: crate::sync::DEFAULT_MAX_ATTEMPTS,
      probe_interval: Duration::from_secs(30),
      probe_timeout: Duration::from_secs(2),
    }
  }
}

impl From<&Config> for EngineSettings {
  fn from(config: &Config) -> Self {
    Self {
      sync_interval: config.sync_interval(),
      cleanup_interval: config.cleanup_interval(),
      max_cache_age: config.max_cache_age(),
      max_attempts: config.sync.max_attempts,
      probe_interval: config.probe_interval(),
      probe_timeout: config.probe_timeout(),
    }
  }
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
  pub store: Arc<dyn Store>,
  pub api: Arc<dyn ApiClient>,
  pub connectivity: Arc<dyn ConnectivitySource>,
  pub clock: Arc<dyn Clock>,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
  pub is_online: bool,
  pub quality: ConnectionQuality,
  /// False when running without offline support
  pub store_available: bool,
  pub last_sync_time: Option<DateTime<Utc>>,
  pub queue_depth: u64,
  pub dead_letter_count: u64,
  pub cache_byte_estimate: u64,
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
  /// Nothing ran (offline, shut down, or another drain in progress)
  pub skipped: bool,
  pub dispatched: usize,
  pub retrying: usize,
  pub dead_lettered: usize,
  pub refreshed: usize,
  pub refresh_failed: usize,
}

pub struct OfflineEngine {
  store: Arc<dyn Store>,
  cache: CacheLayer,
  queue: SyncQueue,
  monitor: Arc<NetworkMonitor>,
  api: Arc<dyn ApiClient>,
  clock: Arc<dyn Clock>,
  events: EventBus,
  settings: EngineSettings,
  scheduler: Mutex<Option<SchedulerHandle>>,
  closed: AtomicBool,
}

impl OfflineEngine {
  pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
    let events = EventBus::default();
    let cache = CacheLayer::new(deps.store.clone(), deps.clock.clone())
      .with_max_age(settings.max_cache_age);
    let queue = SyncQueue::new(deps.store.clone(), deps.clock.clone(), events.clone())
      .with_max_attempts(settings.max_attempts);
    let monitor = NetworkMonitor::new(deps.connectivity, deps.api.clone(), events.clone())
      .with_probe(settings.probe_interval, settings.probe_timeout);

    Self {
      store: deps.store,
      cache,
      queue,
      monitor: Arc::new(monitor),
      api: deps.api,
      clock: deps.clock,
      events,
      settings,
      scheduler: Mutex::new(None),
      closed: AtomicBool::new(false),
    }
  }

  /// Build an engine from configuration.
  ///
  /// If the local store can't be opened the engine still starts, without
  /// offline support: reads go to the network only and enqueue fails.
  pub fn open(
    config: &Config,
    api: Arc<dyn ApiClient>,
    connectivity: Arc<dyn ConnectivitySource>,
  ) -> Self {
    let store = Self::open_store(config.storage.path.clone());
    let deps = EngineDeps {
      store,
      api,
      connectivity,
      clock: Arc::new(SystemClock),
    };
    Self::new(deps, EngineSettings::from(config))
  }

  fn open_store(path: Option<std::path::PathBuf>) -> Arc<dyn Store> {
    let opened = path
      .map(Ok)
      .unwrap_or_else(Database::default_path)
      .and_then(|path| SqliteStore::open(&path));

    match opened {
      Ok(store) => Arc::new(store),
      Err(e) => {
        warn!(error = %e, "Offline support unavailable, continuing without local store");
        Arc::new(NoopStore)
      }
    }
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  pub fn monitor(&self) -> Arc<NetworkMonitor> {
    self.monitor.clone()
  }

  /// TTL-aware access to the cache partitions.
  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
    self.events.subscribe()
  }

  fn today(&self) -> NaiveDate {
    self.clock.now().date_naive()
  }

  /// Queue a mutation for delivery. Works whether or not we're online.
  pub fn enqueue(&self, action: SyncAction, payload: Value) -> Result<TaskId> {
    if self.is_closed() {
      return Err(EngineError::StoreClosed.into());
    }
    self.queue.enqueue(action, payload)
  }

  /// Live data when reachable, otherwise the freshest acceptable cached copy.
  ///
  /// Online, one fetch is attempted; its result is written through to the
  /// cache, and a failed write is returned as an error. If the fetch fails, or
  /// we're offline, the cache is consulted with the configured max age.
  /// Nothing usable yields [`EngineError::NoDataAvailable`].
  pub async fn fetch_with_fallback(
    &self,
    resource: ResourceType,
    params: &Params,
  ) -> Result<CacheResult<Value>> {
    let partition = resource.partition();
    let key = resource.cache_key(params);
    let online = self.is_online();

    if online {
      let request = resource.request_params(self.today(), params);
      match self.api.fetch(resource.endpoint(), &request).await {
        Ok(data) => {
          if !self.is_closed() {
            self.cache.write(partition, &data, Some(&key))?;
          }
          return Ok(CacheResult::from_network(data));
        }
        Err(e) => {
          warn!(%resource, error = %e, "Live fetch failed, falling back to cache");
        }
      }
    } else {
      debug!(%resource, "Offline, serving from cache");
    }

    match self.cache.read(partition, &key, None)? {
      Some(record) if online => Ok(CacheResult::fallback(record.payload, record.cached_at)),
      Some(record) => Ok(CacheResult::offline(record.payload, record.cached_at)),
      None => Err(
        EngineError::NoDataAvailable {
          resource: resource.to_string(),
        }
        .into(),
      ),
    }
  }

  /// Fetch the critical data set concurrently and cache each result.
  ///
  /// Returns `(refreshed, failed)`. One endpoint failing doesn't stop the others.
  pub async fn refresh_critical_data(&self) -> (usize, usize) {
    let endpoints = critical_set(self.today());
    let results = join_all(endpoints.into_iter().map(|endpoint| async move {
      let result = self
        .api
        .fetch(endpoint.resource.endpoint(), &endpoint.params)
        .await;
      (endpoint, result)
    }))
    .await;

    let (mut refreshed, mut failed) = (0, 0);
    for (endpoint, result) in results {
      let written = result.and_then(|data| {
        if self.is_closed() {
          return Err(eyre!("engine shut down"));
        }
        self.cache.write(endpoint.partition(), &data, Some(endpoint.key()))
      });
      match written {
        Ok(_) => refreshed += 1,
        Err(e) => {
          warn!(resource = %endpoint.resource, error = %e, "Failed to refresh critical data");
          failed += 1;
        }
      }
    }

    debug!(refreshed, failed, "Critical data refresh finished");
    (refreshed, failed)
  }

  /// Periodic sync: drain and refresh if online, otherwise do nothing.
  pub async fn background_sync(&self) -> Result<SyncSummary> {
    if self.is_closed() || !self.is_online() {
      debug!("Skipping background sync");
      return Ok(SyncSummary {
        skipped: true,
        ..Default::default()
      });
    }
    self.run_sync().await
  }

  /// Sync immediately. Fails with [`EngineError::Offline`] when offline.
  pub async fn force_sync_now(&self) -> Result<SyncSummary> {
    if !self.is_online() {
      return Err(EngineError::Offline.into());
    }
    if self.is_closed() {
      return Err(EngineError::StoreClosed.into());
    }
    self.run_sync().await
  }

  async fn run_sync(&self) -> Result<SyncSummary> {
    info!("Performing background sync");

    let drain = self.queue.drain(self.api.as_ref()).await?;
    if drain.skipped {
      debug!("Queue drain already running, sync not recorded");
      return Ok(SyncSummary {
        skipped: true,
        ..Default::default()
      });
    }
    let (refreshed, refresh_failed) = self.refresh_critical_data().await;

    let summary = SyncSummary {
      skipped: false,
      dispatched: drain.dispatched,
      retrying: drain.retrying,
      dead_lettered: drain.dead_lettered,
      refreshed,
      refresh_failed,
    };

    if self.is_closed() {
      return Ok(summary);
    }

    let now = self.clock.now();
    self.set_setting(LAST_SYNC_TIME, json!(now.to_rfc3339()))?;
    self.events.emit(EngineEvent::SyncCompleted {
      at: now,
      dispatched: summary.dispatched,
      dead_lettered: summary.dead_lettered,
      refreshed,
      refresh_failed,
    });
    info!(
      dispatched = summary.dispatched,
      refreshed, refresh_failed, "Background sync completed"
    );
    Ok(summary)
  }

  /// Reconnect handling: deliver queued work, then refresh critical data.
  pub async fn on_online(&self) {
    match self.background_sync().await {
      Ok(summary) => debug!(?summary, "Reconnect sync finished"),
      Err(e) => warn!(error = %e, "Reconnect sync failed"),
    }
  }

  /// Sweep expired cache records with the configured max age.
  pub fn cleanup(&self) -> Result<usize> {
    let removed = self.cache.sweep(None)?;
    self.events.emit(EngineEvent::CacheSwept { removed });
    Ok(removed)
  }

  /// Empty the cache partitions. Queued work and settings stay.
  pub fn clear_all_cache(&self) -> Result<()> {
    self.cache.clear_all()
  }

  pub fn read_all(&self, partition: Partition) -> Result<Vec<CacheRecord>> {
    self.cache.read_all(partition)
  }

  pub fn pending(&self) -> Result<Vec<SyncTask>> {
    self.queue.pending()
  }

  pub fn dead_letters(&self) -> Result<Vec<SyncTask>> {
    self.queue.dead_letters()
  }

  pub fn replay_dead_letter(&self, id: TaskId) -> Result<Option<TaskId>> {
    self.queue.replay(id)
  }

  pub fn get_setting(&self, key: &str) -> Result<Option<Value>> {
    Ok(
      self
        .store
        .get(Partition::Settings, key)?
        .map(|record| record.payload),
    )
  }

  pub fn set_setting(&self, key: &str, value: Value) -> Result<()> {
    self.cache.write(Partition::Settings, &value, Some(key))?;
    Ok(())
  }

  fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
    let value = self.get_setting(LAST_SYNC_TIME)?;
    Ok(
      value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc)),
    )
  }

  pub fn status(&self) -> Result<EngineStatus> {
    let mut measured = Partition::CACHE.to_vec();
    measured.push(Partition::SyncQueue);

    Ok(EngineStatus {
      is_online: self.is_online(),
      quality: self.monitor.quality(),
      store_available: self.store.is_available(),
      last_sync_time: self.last_sync_time()?,
      queue_depth: self.queue.depth()?,
      dead_letter_count: self.store.dead_letter_count()?,
      cache_byte_estimate: self.store.byte_estimate(&measured)?,
    })
  }

  /// Start the monitor, sync and cleanup tasks. Calling it again is a no-op.
  pub fn start_background(self: &Arc<Self>) -> Result<()> {
    if self.is_closed() {
      return Err(EngineError::StoreClosed.into());
    }
    let mut slot = self
      .scheduler
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if slot.is_none() {
      *slot = Some(Scheduler::spawn(self.clone()));
      info!("Background tasks started");
    }
    Ok(())
  }

  /// Stop background work and close the store.
  ///
  /// In-flight syncs and fetches see the closed flag and drop their results.
  pub async fn shutdown(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.queue.close();

    let handle = match self.scheduler.lock() {
      Ok(mut slot) => slot.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(handle) = handle {
      handle.shutdown().await;
    }

    self.store.close();
    info!("Offline engine shut down");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::clock::ManualClock;
  use crate::network::ManualConnectivity;
  use crate::testing::{manual_clock, memory_store, FakeApi};

  struct Harness {
    engine: Arc<OfflineEngine>,
    api: Arc<FakeApi>,
    connectivity: Arc<ManualConnectivity>,
    clock: Arc<ManualClock>,
  }

  fn harness_with(online: bool, store: Arc<dyn Store>) -> Harness {
    let api = Arc::new(FakeApi::new());
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let clock = manual_clock();
    let engine = OfflineEngine::new(
      EngineDeps {
        store,
        api: api.clone(),
        connectivity: connectivity.clone(),
        clock: clock.clone(),
      },
      EngineSettings::default(),
    );
    Harness {
      engine: Arc::new(engine),
      api,
      connectivity,
      clock,
    }
  }

  fn harness(online: bool) -> Harness {
    harness_with(online, memory_store())
  }

  fn no_params() -> Params {
    Params::new()
  }

  #[tokio::test]
  async fn test_online_fetch_writes_through() {
    let h = harness(true);
    h.api.respond("/dashboard/stats", json!({"tasks": 12}));

    let result = h
      .engine
      .fetch_with_fallback(ResourceType::DashboardStats, &no_params())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, json!({"tasks": 12}));
    let cached = h.engine.cache().read(Partition::Dashboard, "stats", None).unwrap();
    assert_eq!(cached.unwrap().payload, json!({"tasks": 12}));
  }

  #[tokio::test]
  async fn test_failed_fetch_falls_back_to_cache() {
    let h = harness(true);
    h.api.respond("/workflow/inbox/stats", json!({"unprocessed": 4}));
    h.engine
      .fetch_with_fallback(ResourceType::InboxStats, &no_params())
      .await
      .unwrap();

    h.api.fail_fetch(true);
    let result = h
      .engine
      .fetch_with_fallback(ResourceType::InboxStats, &no_params())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheFallback);
    assert_eq!(result.data, json!({"unprocessed": 4}));
    assert_eq!(h.api.fetch_count(), 2);
  }

  #[tokio::test]
  async fn test_offline_serves_cache_without_network() {
    let h = harness(false);
    h.engine
      .cache()
      .write(Partition::Tasks, &json!([{"id": 1}]), Some("priority"))
      .unwrap();

    let result = h
      .engine
      .fetch_with_fallback(ResourceType::PriorityTasks, &no_params())
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!([{"id": 1}]));
    assert_eq!(h.api.fetch_count(), 0);
  }

  #[tokio::test]
  async fn test_no_data_available() {
    let h = harness(false);
    let err = h
      .engine
      .fetch_with_fallback(ResourceType::TodayMeetings, &no_params())
      .await
      .unwrap_err();
    assert_eq!(
      EngineError::find(&err),
      Some(&EngineError::NoDataAvailable {
        resource: "today-meetings".to_string()
      })
    );

    // stale data counts as none
    h.engine
      .cache()
      .write(Partition::Meetings, &json!([]), Some("today"))
      .unwrap();
    h.clock.advance(chrono::Duration::hours(25));
    let err = h
      .engine
      .fetch_with_fallback(ResourceType::TodayMeetings, &no_params())
      .await
      .unwrap_err();
    assert!(matches!(
      EngineError::find(&err),
      Some(EngineError::NoDataAvailable { .. })
    ));
  }

  #[tokio::test]
  async fn test_params_are_sent_and_cached_separately() {
    let h = harness(true);
    h.api.respond("/tasks", json!(["a"]));
    let mut params = Params::new();
    params.insert("limit".into(), "25".into());

    h.engine
      .fetch_with_fallback(ResourceType::PriorityTasks, &params)
      .await
      .unwrap();

    let (endpoint, sent) = h.api.fetches().remove(0);
    assert_eq!(endpoint, "/tasks");
    assert_eq!(sent["limit"], "25");
    assert_eq!(sent["priority"], "HIGH,URGENT");

    let key = ResourceType::PriorityTasks.cache_key(&params);
    assert!(h.engine.cache().read(Partition::Tasks, &key, None).unwrap().is_some());
    assert!(h.engine.cache().read(Partition::Tasks, "priority", None).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_force_sync_offline_fails() {
    let h = harness(false);
    let err = h.engine.force_sync_now().await.unwrap_err();
    assert_eq!(EngineError::find(&err), Some(&EngineError::Offline));
  }

  #[tokio::test]
  async fn test_background_sync_offline_is_skipped() {
    let h = harness(false);
    h.engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap();

    let summary = h.engine.background_sync().await.unwrap();
    assert!(summary.skipped);
    assert!(h.api.calls().is_empty());
    assert_eq!(h.engine.status().unwrap().queue_depth, 1);
  }

  #[tokio::test]
  async fn test_offline_enqueue_then_reconnect() {
    let h = harness(false);
    for n in 1..=3 {
      h.engine
        .enqueue(SyncAction::CreateTask, json!({"task": {"n": n}}))
        .unwrap();
    }
    h.clock.advance(chrono::Duration::minutes(7));

    h.connectivity.set_online(true);
    h.engine.on_online().await;

    assert_eq!(
      h.api.calls(),
      vec![
        "create:{\"n\":1}".to_string(),
        "create:{\"n\":2}".to_string(),
        "create:{\"n\":3}".to_string(),
      ]
    );
    let status = h.engine.status().unwrap();
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.last_sync_time, Some(h.clock.now()));
  }

  #[tokio::test]
  async fn test_sync_refreshes_critical_data_despite_failures() {
    let h = harness(true);
    h.api.respond("/dashboard/stats", json!({"tasks": 1}));
    h.api.respond("/meetings", json!([]));
    let mut events = h.engine.subscribe();

    let summary = h.engine.force_sync_now().await.unwrap();

    assert_eq!(summary.refreshed, 2);
    assert_eq!(summary.refresh_failed, 2);
    assert_eq!(h.api.fetch_count(), 4);
    assert!(h.engine.cache().read(Partition::Dashboard, "stats", None).unwrap().is_some());
    assert!(h.engine.cache().read(Partition::Meetings, "today", None).unwrap().is_some());

    let meetings = h
      .api
      .fetches()
      .into_iter()
      .find(|(endpoint, _)| endpoint == "/meetings")
      .unwrap();
    assert_eq!(meetings.1["startDate"], "2023-11-14");

    match events.try_recv().unwrap() {
      EngineEvent::SyncCompleted { refreshed, .. } => assert_eq!(refreshed, 2),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_clear_all_cache_keeps_queue() {
    let h = harness(true);
    h.engine
      .cache()
      .write(Partition::Crm, &json!({"id": "c1"}), None)
      .unwrap();
    h.engine
      .enqueue(SyncAction::MarkNotificationRead, json!({"notificationId": "n1"}))
      .unwrap();

    h.engine.clear_all_cache().unwrap();

    assert!(h.engine.read_all(Partition::Crm).unwrap().is_empty());
    assert_eq!(h.engine.pending().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_status_reports_store_and_queue() {
    let h = harness(true);
    let status = h.engine.status().unwrap();
    assert!(status.is_online);
    assert!(status.store_available);
    assert_eq!(status.last_sync_time, None);
    assert_eq!(status.cache_byte_estimate, 0);

    h.engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap();
    let status = h.engine.status().unwrap();
    assert_eq!(status.queue_depth, 1);
    assert!(status.cache_byte_estimate > 0);
  }

  #[tokio::test]
  async fn test_dead_letter_replay_through_engine() {
    let h = harness(true);
    h.api.fail_mutations(true);
    let id = h
      .engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap();
    for _ in 0..3 {
      h.engine.force_sync_now().await.unwrap();
    }
    assert_eq!(h.engine.status().unwrap().dead_letter_count, 1);

    h.engine.replay_dead_letter(id).unwrap().unwrap();
    h.api.fail_mutations(false);
    let summary = h.engine.force_sync_now().await.unwrap();

    assert_eq!(summary.dispatched, 1);
    assert!(h.engine.dead_letters().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_settings_round_trip() {
    let h = harness(true);
    assert_eq!(h.engine.get_setting("theme").unwrap(), None);
    h.engine.set_setting("theme", json!("dark")).unwrap();
    h.clock.advance(chrono::Duration::days(30));
    assert_eq!(h.engine.get_setting("theme").unwrap(), Some(json!("dark")));
  }

  #[tokio::test]
  async fn test_cleanup_emits_event() {
    let h = harness(true);
    h.engine
      .cache()
      .write(Partition::Dashboard, &json!({}), Some("stats"))
      .unwrap();
    h.clock.advance(chrono::Duration::hours(25));
    let mut events = h.engine.subscribe();

    assert_eq!(h.engine.cleanup().unwrap(), 1);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::CacheSwept { removed: 1 });
  }

  #[tokio::test]
  async fn test_degraded_store_still_serves_network() {
    let h = harness_with(true, Arc::new(NoopStore));
    h.api.respond("/dashboard/stats", json!({"tasks": 2}));

    let result = h
      .engine
      .fetch_with_fallback(ResourceType::DashboardStats, &no_params())
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);

    let err = h
      .engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap_err();
    assert_eq!(EngineError::find(&err), Some(&EngineError::StoreUnavailable));
    assert!(!h.engine.status().unwrap().store_available);
  }

  #[test]
  fn test_open_degrades_when_store_path_is_unusable() {
    let blocker = std::env::temp_dir().join(format!("offline-sync-blocker-{}", std::process::id()));
    std::fs::write(&blocker, b"not a directory").unwrap();

    let store = OfflineEngine::open_store(Some(blocker.join("nested").join("offline.db")));
    assert!(!store.is_available());

    std::fs::remove_file(&blocker).unwrap();
  }

  #[tokio::test]
  async fn test_write_through_failure_is_returned() {
    let store = memory_store();
    let h = harness_with(true, store.clone());
    h.api.respond("/dashboard/stats", json!({"tasks": 3}));

    store.close();
    let err = h
      .engine
      .fetch_with_fallback(ResourceType::DashboardStats, &no_params())
      .await
      .unwrap_err();
    assert_eq!(EngineError::find(&err), Some(&EngineError::StoreClosed));
  }

  #[tokio::test]
  async fn test_sync_during_running_drain_is_not_recorded() {
    let h = harness(true);
    h.api.respond("/dashboard/stats", json!({"tasks": 1}));
    h.api.delay_mutations(std::time::Duration::from_millis(20));
    h.engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap();
    let mut events = h.engine.subscribe();

    let (drain, sync) = tokio::join!(
      h.engine.queue.drain(h.api.as_ref()),
      h.engine.force_sync_now()
    );

    assert_eq!(drain.unwrap().dispatched, 1);
    assert_eq!(
      sync.unwrap(),
      SyncSummary {
        skipped: true,
        ..Default::default()
      }
    );
    assert_eq!(h.api.calls(), vec!["complete:t1".to_string()]);
    assert_eq!(h.api.fetch_count(), 0);
    assert_eq!(h.engine.status().unwrap().last_sync_time, None);
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_shutdown_stops_work() {
    let h = harness(true);
    h.engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t1"}))
      .unwrap();

    h.engine.shutdown().await;

    let summary = h.engine.background_sync().await.unwrap();
    assert!(summary.skipped);
    assert!(h.api.calls().is_empty());
    assert!(h
      .engine
      .enqueue(SyncAction::CompleteTask, json!({"taskId": "t2"}))
      .is_err());
    assert!(h.engine.start_background().is_err());
  }
}
