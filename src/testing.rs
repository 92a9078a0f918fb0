//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{ApiClient, Params};
use crate::cache::{SqliteStore, Store};
use crate::clock::ManualClock;

pub fn start_time() -> DateTime<Utc> {
  DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new(start_time()))
}

pub fn memory_store() -> Arc<dyn Store> {
  Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Scriptable in-process API.
#[derive(Default)]
pub struct FakeApi {
  calls: Mutex<Vec<String>>,
  completions: Mutex<Vec<Option<DateTime<Utc>>>>,
  responses: Mutex<HashMap<String, Value>>,
  fetches: Mutex<Vec<(String, Params)>>,
  pings: AtomicUsize,
  fail_fetch: AtomicBool,
  fail_mutations: AtomicBool,
  fail_ping: AtomicBool,
  mutation_delay: Mutex<Option<Duration>>,
  ping_delay: Mutex<Option<Duration>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, endpoint: &str, value: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(endpoint.to_string(), value);
  }

  /// Mutation calls in the order they arrived.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// Completion times passed to `complete_task`, in call order.
  pub fn completions(&self) -> Vec<Option<DateTime<Utc>>> {
    self.completions.lock().unwrap().clone()
  }

  pub fn fetches(&self) -> Vec<(String, Params)> {
    self.fetches.lock().unwrap().clone()
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.lock().unwrap().len()
  }

  pub fn ping_count(&self) -> usize {
    self.pings.load(Ordering::SeqCst)
  }

  pub fn fail_fetch(&self, fail: bool) {
    self.fail_fetch.store(fail, Ordering::SeqCst);
  }

  pub fn fail_mutations(&self, fail: bool) {
    self.fail_mutations.store(fail, Ordering::SeqCst);
  }

  pub fn fail_ping(&self, fail: bool) {
    self.fail_ping.store(fail, Ordering::SeqCst);
  }

  pub fn delay_mutations(&self, delay: Duration) {
    *self.mutation_delay.lock().unwrap() = Some(delay);
  }

  pub fn delay_ping(&self, delay: Duration) {
    *self.ping_delay.lock().unwrap() = Some(delay);
  }

  async fn mutation(&self, call: String) -> Result<()> {
    self.calls.lock().unwrap().push(call.clone());
    let delay = *self.mutation_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_mutations.load(Ordering::SeqCst) {
      return Err(eyre!("HTTP 503 for {}", call));
    }
    Ok(())
  }
}

#[async_trait]
impl ApiClient for FakeApi {
  async fn complete_task(&self, id: &str, completed_at: Option<DateTime<Utc>>) -> Result<()> {
    self.completions.lock().unwrap().push(completed_at);
    self.mutation(format!("complete:{}", id)).await
  }

  async fn update_task(&self, id: &str, patch: &Value) -> Result<()> {
    self.mutation(format!("update:{}:{}", id, patch)).await
  }

  async fn create_task(&self, data: &Value) -> Result<()> {
    self.mutation(format!("create:{}", data)).await
  }

  async fn mark_notification_read(&self, id: &str) -> Result<()> {
    self.mutation(format!("read:{}", id)).await
  }

  async fn fetch(&self, endpoint: &str, params: &Params) -> Result<Value> {
    self
      .fetches
      .lock()
      .unwrap()
      .push((endpoint.to_string(), params.clone()));
    if self.fail_fetch.load(Ordering::SeqCst) {
      return Err(eyre!("connection reset fetching {}", endpoint));
    }
    self
      .responses
      .lock()
      .unwrap()
      .get(endpoint)
      .cloned()
      .ok_or_else(|| eyre!("HTTP 404 for {}", endpoint))
  }

  async fn ping(&self) -> Result<()> {
    self.pings.fetch_add(1, Ordering::SeqCst);
    let delay = *self.ping_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_ping.load(Ordering::SeqCst) {
      return Err(eyre!("ping failed"));
    }
    Ok(())
  }
}
