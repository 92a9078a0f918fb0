//! TTL-aware accessor over the raw store.

use chrono::Duration;
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::Partition;
use crate::error::EngineError;

use super::storage::Store;
use super::traits::{CacheRecord, KeyRange};

/// Applies max-age semantics on top of a [`Store`].
///
/// Every write stamps `cached_at` with the injected clock; a single-key read
/// only returns records whose age is within the max age.
pub struct CacheLayer {
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
  /// Default max age for reads and the cleanup sweep
  max_age: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the default 24 hour max age.
  pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      max_age: Duration::hours(24),
    }
  }

  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  /// Check if a record is older than `max_age`.
  fn is_stale(&self, record: &CacheRecord, max_age: Duration) -> bool {
    self.clock.now() - record.cached_at > max_age
  }

  /// Persist `payload` in `partition`, stamped with the current time.
  ///
  /// Stored under `key` when given, otherwise under the payload's own
  /// identity field (the partition's key path). Returns the key used.
  pub fn write(&self, partition: Partition, payload: &Value, key: Option<&str>) -> Result<String> {
    let key = match key {
      Some(k) => k.to_string(),
      None => natural_key(partition, payload)?,
    };

    let record = CacheRecord {
      key,
      payload: payload.clone(),
      cached_at: self.clock.now(),
    };
    self.store.put(partition, &record)?;

    debug!(partition = %partition, key = %record.key, "Cached record");
    Ok(record.key)
  }

  /// Read a record, treating anything older than `max_age` (default: the
  /// layer's max age) as absent.
  pub fn read(
    &self,
    partition: Partition,
    key: &str,
    max_age: Option<Duration>,
  ) -> Result<Option<CacheRecord>> {
    let max_age = max_age.unwrap_or(self.max_age);

    match self.store.get(partition, key)? {
      Some(record) if self.is_stale(&record, max_age) => {
        debug!(partition = %partition, key, "Cached record is stale");
        Ok(None)
      }
      other => Ok(other),
    }
  }

  /// Every record in the partition.
  ///
  /// Unlike [`read`](Self::read) this does not filter stale records, so list
  /// views can still show something when nothing fresher exists.
  pub fn read_all(&self, partition: Partition) -> Result<Vec<CacheRecord>> {
    self.store.get_all(partition)
  }

  /// Records matched by a secondary index, ordered by the indexed value.
  pub fn query(&self, partition: Partition, index: &str, range: &KeyRange) -> Result<Vec<CacheRecord>> {
    self.store.range_by_index(partition, index, range)
  }

  /// Delete every cache record older than `max_age` (default: the layer's
  /// max age). Returns how many were removed.
  pub fn sweep(&self, max_age: Option<Duration>) -> Result<usize> {
    let cutoff = self.clock.now() - max_age.unwrap_or(self.max_age);

    let mut removed = 0;
    for partition in Partition::CACHE {
      let n = self.store.delete_older_than(partition, cutoff)?;
      if n > 0 {
        debug!(partition = %partition, removed = n, "Pruned stale records");
      }
      removed += n;
    }

    info!(removed, "Cache cleanup completed");
    Ok(removed)
  }

  /// Empty every cache partition. Settings and the sync queue are untouched.
  pub fn clear_all(&self) -> Result<()> {
    for partition in Partition::CACHE {
      self.store.clear(partition)?;
    }
    info!("All cache cleared");
    Ok(())
  }
}

/// The payload's identity value under the partition's key path.
fn natural_key(partition: Partition, payload: &Value) -> Result<String> {
  let key_path = partition.key_path();
  match payload.get(key_path) {
    Some(Value::String(s)) => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    _ => Err(
      EngineError::MissingKey {
        partition: partition.name(),
        key_path,
      }
      .into(),
    ),
  }
}
