//! Store trait and its SQLite and no-op implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::db::{Database, Partition, CURRENT_SCHEMA_VERSION};
use crate::error::EngineError;
use crate::sync::task::{SyncAction, SyncTask, TaskId, TaskState};

use super::traits::{CacheRecord, KeyRange};

/// Durable, partitioned storage for the offline engine.
///
/// Record operations work on every partition except `SyncQueue`, which is
/// reached through the queue operations instead. Errors propagate to the
/// caller as-is; nothing here retries.
pub trait Store: Send + Sync {
  /// Insert or overwrite a record.
  fn put(&self, partition: Partition, record: &CacheRecord) -> Result<()>;

  fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheRecord>>;

  /// Every record in the partition, ordered by key.
  fn get_all(&self, partition: Partition) -> Result<Vec<CacheRecord>>;

  fn delete(&self, partition: Partition, key: &str) -> Result<()>;

  /// Records whose index value falls inside `range`, ordered by that value.
  fn range_by_index(
    &self,
    partition: Partition,
    index: &str,
    range: &KeyRange,
  ) -> Result<Vec<CacheRecord>>;

  /// Delete records cached strictly before `cutoff`. Returns how many went.
  fn delete_older_than(&self, partition: Partition, cutoff: DateTime<Utc>) -> Result<usize>;

  fn clear(&self, partition: Partition) -> Result<()>;

  /// Approximate payload bytes held by the given partitions.
  fn byte_estimate(&self, partitions: &[Partition]) -> Result<u64>;

  /// Append a task to the sync queue.
  fn push_task(&self, action: SyncAction, payload: &Value, enqueued_at: DateTime<Utc>)
    -> Result<TaskId>;

  /// Queued tasks in insertion order.
  fn pending_tasks(&self) -> Result<Vec<SyncTask>>;

  fn record_failure(&self, id: TaskId, attempts: u32, error: &str) -> Result<()>;

  fn remove_task(&self, id: TaskId) -> Result<()>;

  /// Move a queued task to the dead-letter area in one transaction.
  fn dead_letter(&self, id: TaskId, at: DateTime<Utc>) -> Result<()>;

  fn dead_letters(&self) -> Result<Vec<SyncTask>>;

  /// Put a dead letter back at the tail of the queue with a fresh budget.
  /// Returns the new task id, or `None` if no such dead letter exists.
  fn replay_dead_letter(&self, id: TaskId, at: DateTime<Utc>) -> Result<Option<TaskId>>;

  fn queue_depth(&self) -> Result<u64>;

  fn dead_letter_count(&self) -> Result<u64>;

  /// Whether this store actually persists anything.
  fn is_available(&self) -> bool {
    true
  }

  /// Release the underlying handle. Later calls fail with `StoreClosed`.
  fn close(&self) {}
}

/// Storage used when the real store could not be opened.
/// Reads always miss and cache writes are discarded; queueing fails loudly
/// so callers do not believe a mutation was kept.
pub struct NoopStore;

impl Store for NoopStore {
  fn put(&self, _partition: Partition, _record: &CacheRecord) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _partition: Partition, _key: &str) -> Result<Option<CacheRecord>> {
    Ok(None) // Always miss
  }

  fn get_all(&self, _partition: Partition) -> Result<Vec<CacheRecord>> {
    Ok(Vec::new())
  }

  fn delete(&self, _partition: Partition, _key: &str) -> Result<()> {
    Ok(())
  }

  fn range_by_index(
    &self,
    _partition: Partition,
    _index: &str,
    _range: &KeyRange,
  ) -> Result<Vec<CacheRecord>> {
    Ok(Vec::new())
  }

  fn delete_older_than(&self, _partition: Partition, _cutoff: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self, _partition: Partition) -> Result<()> {
    Ok(())
  }

  fn byte_estimate(&self, _partitions: &[Partition]) -> Result<u64> {
    Ok(0)
  }

  fn push_task(
    &self,
    _action: SyncAction,
    _payload: &Value,
    _enqueued_at: DateTime<Utc>,
  ) -> Result<TaskId> {
    Err(EngineError::StoreUnavailable.into())
  }

  fn pending_tasks(&self) -> Result<Vec<SyncTask>> {
    Ok(Vec::new())
  }

  fn record_failure(&self, _id: TaskId, _attempts: u32, _error: &str) -> Result<()> {
    Ok(())
  }

  fn remove_task(&self, _id: TaskId) -> Result<()> {
    Ok(())
  }

  fn dead_letter(&self, _id: TaskId, _at: DateTime<Utc>) -> Result<()> {
    Ok(())
  }

  fn dead_letters(&self) -> Result<Vec<SyncTask>> {
    Ok(Vec::new())
  }

  fn replay_dead_letter(&self, _id: TaskId, _at: DateTime<Utc>) -> Result<Option<TaskId>> {
    Ok(None)
  }

  fn queue_depth(&self) -> Result<u64> {
    Ok(0)
  }

  fn dead_letter_count(&self) -> Result<u64> {
    Ok(0)
  }

  fn is_available(&self) -> bool {
    false
  }
}

/// SQLite-based store implementation.
pub struct SqliteStore {
  db: Mutex<Option<Database>>,
}

type RawRecord = (String, String, i64);
type RawTask = (TaskId, String, String, i64, u32, Option<String>);

impl SqliteStore {
  /// Open (or create) the store at `path` with the current schema.
  pub fn open(path: &Path) -> Result<Self> {
    Self::open_with_version(path, CURRENT_SCHEMA_VERSION)
  }

  pub fn open_with_version(path: &Path, schema_version: u32) -> Result<Self> {
    Ok(Self::from_database(Database::open(path, schema_version)?))
  }

  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::from_database(Database::open_in_memory(
      CURRENT_SCHEMA_VERSION,
    )?))
  }

  pub fn from_database(db: Database) -> Self {
    Self {
      db: Mutex::new(Some(db)),
    }
  }

  fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
    let mut guard = self.db.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let db = guard.as_mut().ok_or(EngineError::StoreClosed)?;
    f(db)
  }
}

fn record_table(partition: Partition) -> Result<&'static str> {
  if partition.holds_records() {
    Ok(partition.table())
  } else {
    Err(EngineError::UnsupportedPartition(partition.name()).into())
  }
}

fn read_raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn read_raw_task(row: &Row<'_>) -> rusqlite::Result<RawTask> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_record((key, payload, cached_at): RawRecord) -> Result<CacheRecord> {
  let payload = serde_json::from_str(&payload)
    .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
  Ok(CacheRecord {
    key,
    payload,
    cached_at: from_millis(cached_at)?,
  })
}

fn into_task(
  (id, action, payload, enqueued_at, attempts, last_error): RawTask,
  state: impl FnOnce(u32, Option<String>) -> Result<TaskState>,
) -> Result<SyncTask> {
  let action: SyncAction = action
    .parse()
    .map_err(|e| eyre!("Corrupt sync task {}: {}", id, e))?;
  let payload = serde_json::from_str(&payload)
    .map_err(|e| eyre!("Failed to deserialize sync task {}: {}", id, e))?;
  Ok(SyncTask {
    id,
    action,
    payload,
    enqueued_at: from_millis(enqueued_at)?,
    state: state(attempts, last_error)?,
  })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or_else(|| eyre!("Invalid timestamp {}", ms))
}

impl Store for SqliteStore {
  fn put(&self, partition: Partition, record: &CacheRecord) -> Result<()> {
    let table = record_table(partition)?;
    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    self.with_db(|db| {
      db.conn()
        .execute(
          &format!(
            "INSERT OR REPLACE INTO {} (key, payload, cached_at) VALUES (?, ?, ?)",
            table
          ),
          params![record.key, payload, record.cached_at.timestamp_millis()],
        )
        .map_err(|e| eyre!("Failed to store record in {}: {}", partition, e))?;
      Ok(())
    })
  }

  fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheRecord>> {
    let table = record_table(partition)?;

    let raw = self.with_db(|db| {
      db.conn()
        .query_row(
          &format!("SELECT key, payload, cached_at FROM {} WHERE key = ?", table),
          params![key],
          read_raw_record,
        )
        .optional()
        .map_err(|e| eyre!("Failed to read {} from {}: {}", key, partition, e))
    })?;

    raw.map(into_record).transpose()
  }

  fn get_all(&self, partition: Partition) -> Result<Vec<CacheRecord>> {
    let table = record_table(partition)?;

    let rows = self.with_db(|db| {
      let mut stmt = db
        .conn()
        .prepare(&format!(
          "SELECT key, payload, cached_at FROM {} ORDER BY key",
          table
        ))
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], read_raw_record)
        .map_err(|e| eyre!("Failed to query {}: {}", partition, e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read {}: {}", partition, e))?;
      Ok(rows)
    })?;

    rows.into_iter().map(into_record).collect()
  }

  fn delete(&self, partition: Partition, key: &str) -> Result<()> {
    let table = record_table(partition)?;

    self.with_db(|db| {
      db.conn()
        .execute(&format!("DELETE FROM {} WHERE key = ?", table), params![key])
        .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, partition, e))?;
      Ok(())
    })
  }

  fn range_by_index(
    &self,
    partition: Partition,
    index: &str,
    range: &KeyRange,
  ) -> Result<Vec<CacheRecord>> {
    let table = record_table(partition)?;
    let spec = partition
      .index(index)
      .ok_or_else(|| EngineError::UnknownIndex {
        partition: partition.name(),
        index: index.to_string(),
      })?;

    let (predicate, values) = range.to_sql_predicate(spec.expr);
    let sql = format!(
      "SELECT key, payload, cached_at FROM {} WHERE {} ORDER BY {}, key",
      table, predicate, spec.expr
    );

    let rows = self.with_db(|db| {
      let mut stmt = db
        .conn()
        .prepare(&sql)
        .map_err(|e| eyre!("Failed to prepare index query: {}", e))?;

      let rows = stmt
        .query_map(params_from_iter(values.iter()), read_raw_record)
        .map_err(|e| eyre!("Failed to query {} by {}: {}", partition, index, e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read {} by {}: {}", partition, index, e))?;
      Ok(rows)
    })?;

    rows.into_iter().map(into_record).collect()
  }

  fn delete_older_than(&self, partition: Partition, cutoff: DateTime<Utc>) -> Result<usize> {
    let table = record_table(partition)?;

    self.with_db(|db| {
      db.conn()
        .execute(
          &format!("DELETE FROM {} WHERE cached_at < ?", table),
          params![cutoff.timestamp_millis()],
        )
        .map_err(|e| eyre!("Failed to prune {}: {}", partition, e))
    })
  }

  fn clear(&self, partition: Partition) -> Result<()> {
    self.with_db(|db| {
      db.conn()
        .execute(&format!("DELETE FROM {}", partition.table()), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", partition, e))?;
      Ok(())
    })
  }

  fn byte_estimate(&self, partitions: &[Partition]) -> Result<u64> {
    self.with_db(|db| {
      let mut total: i64 = 0;
      for partition in partitions {
        let sql = if partition.holds_records() {
          format!(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(payload)), 0) FROM {}",
            partition.table()
          )
        } else {
          format!(
            "SELECT COALESCE(SUM(LENGTH(action) + LENGTH(payload)), 0) FROM {}",
            partition.table()
          )
        };
        let bytes: i64 = db
          .conn()
          .query_row(&sql, [], |row| row.get(0))
          .map_err(|e| eyre!("Failed to measure {}: {}", partition, e))?;
        total += bytes;
      }
      Ok(total.max(0) as u64)
    })
  }

  fn push_task(
    &self,
    action: SyncAction,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<TaskId> {
    let payload =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    self.with_db(|db| {
      db.conn()
        .execute(
          "INSERT INTO sync_queue (action, payload, enqueued_at, attempts) VALUES (?, ?, ?, 0)",
          params![action.as_str(), payload, enqueued_at.timestamp_millis()],
        )
        .map_err(|e| eyre!("Failed to enqueue {}: {}", action, e))?;
      Ok(db.conn().last_insert_rowid())
    })
  }

  fn pending_tasks(&self) -> Result<Vec<SyncTask>> {
    let rows = self.with_db(|db| {
      let mut stmt = db
        .conn()
        .prepare(
          "SELECT id, action, payload, enqueued_at, attempts, last_error
           FROM sync_queue ORDER BY id",
        )
        .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

      let rows = stmt
        .query_map([], read_raw_task)
        .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read sync queue: {}", e))?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|raw| into_task(raw, |attempts, err| Ok(SyncTask::queued_state(attempts, err))))
      .collect()
  }

  fn record_failure(&self, id: TaskId, attempts: u32, error: &str) -> Result<()> {
    self.with_db(|db| {
      db.conn()
        .execute(
          "UPDATE sync_queue SET attempts = ?, last_error = ? WHERE id = ?",
          params![attempts, error, id],
        )
        .map_err(|e| eyre!("Failed to record failure for task {}: {}", id, e))?;
      Ok(())
    })
  }

  fn remove_task(&self, id: TaskId) -> Result<()> {
    self.with_db(|db| {
      db.conn()
        .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove task {}: {}", id, e))?;
      Ok(())
    })
  }

  fn dead_letter(&self, id: TaskId, at: DateTime<Utc>) -> Result<()> {
    self.with_db(|db| {
      let tx = db
        .conn_mut()
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO dead_letters
           (id, action, payload, enqueued_at, attempts, last_error, dead_lettered_at)
         SELECT id, action, payload, enqueued_at, attempts, COALESCE(last_error, ''), ?
         FROM sync_queue WHERE id = ?",
        params![at.timestamp_millis(), id],
      )
      .map_err(|e| eyre!("Failed to dead-letter task {}: {}", id, e))?;

      tx.execute("DELETE FROM sync_queue WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove task {}: {}", id, e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(())
    })
  }

  fn dead_letters(&self) -> Result<Vec<SyncTask>> {
    let rows = self.with_db(|db| {
      let mut stmt = db
        .conn()
        .prepare(
          "SELECT id, action, payload, enqueued_at, attempts, last_error, dead_lettered_at
           FROM dead_letters ORDER BY id",
        )
        .map_err(|e| eyre!("Failed to prepare dead-letter query: {}", e))?;

      let rows = stmt
        .query_map([], |row| Ok((read_raw_task(row)?, row.get::<_, i64>(6)?)))
        .map_err(|e| eyre!("Failed to query dead letters: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read dead letters: {}", e))?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(raw, at)| {
        into_task(raw, |attempts, last_error| {
          Ok(TaskState::DeadLettered {
            attempts,
            last_error: last_error.unwrap_or_default(),
            at: from_millis(at)?,
          })
        })
      })
      .collect()
  }

  fn replay_dead_letter(&self, id: TaskId, at: DateTime<Utc>) -> Result<Option<TaskId>> {
    self.with_db(|db| {
      let tx = db
        .conn_mut()
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let row: Option<(String, String)> = tx
        .query_row(
          "SELECT action, payload FROM dead_letters WHERE id = ?",
          params![id],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read dead letter {}: {}", id, e))?;

      let Some((action, payload)) = row else {
        return Ok(None);
      };

      tx.execute(
        "INSERT INTO sync_queue (action, payload, enqueued_at, attempts) VALUES (?, ?, ?, 0)",
        params![action, payload, at.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to requeue dead letter {}: {}", id, e))?;
      let new_id = tx.last_insert_rowid();

      tx.execute("DELETE FROM dead_letters WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove dead letter {}: {}", id, e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

      debug!(old_id = id, new_id, "Dead letter requeued");
      Ok(Some(new_id))
    })
  }

  fn queue_depth(&self) -> Result<u64> {
    self.with_db(|db| {
      let count: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count sync queue: {}", e))?;
      Ok(count as u64)
    })
  }

  fn dead_letter_count(&self) -> Result<u64> {
    self.with_db(|db| {
      let count: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count dead letters: {}", e))?;
      Ok(count as u64)
    })
  }

  fn close(&self) {
    let closed = match self.db.lock() {
      Ok(mut guard) => guard.take().is_some(),
      Err(poisoned) => poisoned.into_inner().take().is_some(),
    };
    if closed {
      info!("Offline store closed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::IndexValue;
  use chrono::Duration;
  use serde_json::json;

  fn t(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
  }

  fn record(key: &str, payload: Value, cached_at: DateTime<Utc>) -> CacheRecord {
    CacheRecord {
      key: key.to_string(),
      payload,
      cached_at,
    }
  }

  #[test]
  fn test_put_get_delete() {
    let store = SqliteStore::open_in_memory().unwrap();
    let rec = record("stats", json!({"open": 4}), t(0));

    store.put(Partition::Dashboard, &rec).unwrap();
    assert_eq!(store.get(Partition::Dashboard, "stats").unwrap(), Some(rec));
    assert_eq!(store.get(Partition::Tasks, "stats").unwrap(), None);

    store.delete(Partition::Dashboard, "stats").unwrap();
    assert_eq!(store.get(Partition::Dashboard, "stats").unwrap(), None);
  }

  #[test]
  fn test_put_overwrites() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put(Partition::Tasks, &record("t1", json!({"v": 1}), t(0)))
      .unwrap();
    store
      .put(Partition::Tasks, &record("t1", json!({"v": 2}), t(5)))
      .unwrap();

    let all = store.get_all(Partition::Tasks).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].payload, json!({"v": 2}));
    assert_eq!(all[0].cached_at, t(5));
  }

  #[test]
  fn test_range_by_field_index() {
    let store = SqliteStore::open_in_memory().unwrap();
    for (id, status, priority) in [
      ("a", "NEW", 3),
      ("b", "DONE", 1),
      ("c", "NEW", 2),
      ("d", "IN_PROGRESS", 5),
    ] {
      store
        .put(
          Partition::Tasks,
          &record(id, json!({"id": id, "status": status, "priority": priority}), t(0)),
        )
        .unwrap();
    }

    let new: Vec<String> = store
      .range_by_index(Partition::Tasks, "status", &KeyRange::only("NEW"))
      .unwrap()
      .into_iter()
      .map(|r| r.key)
      .collect();
    assert_eq!(new, vec!["a", "c"]);

    let urgent: Vec<String> = store
      .range_by_index(Partition::Tasks, "priority", &KeyRange::lower_bound(3i64, false))
      .unwrap()
      .into_iter()
      .map(|r| r.key)
      .collect();
    assert_eq!(urgent, vec!["a", "d"]);
  }

  #[test]
  fn test_range_by_timestamp_index() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put(Partition::Meetings, &record("m1", json!({}), t(0)))
      .unwrap();
    store
      .put(Partition::Meetings, &record("m2", json!({}), t(100)))
      .unwrap();

    let old = store
      .range_by_index(
        Partition::Meetings,
        "timestamp",
        &KeyRange::upper_bound(IndexValue::from(t(100)), true),
      )
      .unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].key, "m1");
  }

  #[test]
  fn test_unknown_index_is_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store
      .range_by_index(Partition::Crm, "status", &KeyRange::only("x"))
      .unwrap_err();
    assert!(matches!(
      EngineError::find(&err),
      Some(EngineError::UnknownIndex { .. })
    ));
  }

  #[test]
  fn test_queue_partition_rejects_record_ops() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.get(Partition::SyncQueue, "1").unwrap_err();
    assert_eq!(
      EngineError::find(&err),
      Some(&EngineError::UnsupportedPartition("syncQueue"))
    );
  }

  #[test]
  fn test_delete_older_than_is_strict() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .put(Partition::Crm, &record("old", json!({}), t(0)))
      .unwrap();
    store
      .put(Partition::Crm, &record("edge", json!({}), t(10)))
      .unwrap();
    store
      .put(Partition::Crm, &record("new", json!({}), t(20)))
      .unwrap();

    assert_eq!(store.delete_older_than(Partition::Crm, t(10)).unwrap(), 1);
    let keys: Vec<String> = store
      .get_all(Partition::Crm)
      .unwrap()
      .into_iter()
      .map(|r| r.key)
      .collect();
    assert_eq!(keys, vec!["edge", "new"]);
  }

  #[test]
  fn test_queue_fifo_and_failure_bookkeeping() {
    let store = SqliteStore::open_in_memory().unwrap();
    let a = store
      .push_task(SyncAction::CreateTask, &json!({"task": 1}), t(0))
      .unwrap();
    let b = store
      .push_task(SyncAction::CompleteTask, &json!({"taskId": "x"}), t(1))
      .unwrap();
    assert!(b > a);

    store.record_failure(a, 1, "HTTP 500").unwrap();

    let tasks = store.pending_tasks().unwrap();
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(tasks[0].attempts(), 1);
    assert_eq!(tasks[0].last_error(), Some("HTTP 500"));
    assert_eq!(tasks[1].state, TaskState::Pending);
    assert_eq!(store.queue_depth().unwrap(), 2);

    store.remove_task(b).unwrap();
    assert_eq!(store.queue_depth().unwrap(), 1);
  }

  #[test]
  fn test_dead_letter_and_replay() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = store
      .push_task(SyncAction::UpdateTask, &json!({"taskId": "t"}), t(0))
      .unwrap();
    store.record_failure(id, 3, "timeout").unwrap();
    store.dead_letter(id, t(60)).unwrap();

    assert_eq!(store.queue_depth().unwrap(), 0);
    let dead = store.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(
      dead[0].state,
      TaskState::DeadLettered {
        attempts: 3,
        last_error: "timeout".into(),
        at: t(60),
      }
    );

    let new_id = store.replay_dead_letter(id, t(120)).unwrap().unwrap();
    assert!(new_id > id);
    assert_eq!(store.dead_letter_count().unwrap(), 0);
    let queued = store.pending_tasks().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].state, TaskState::Pending);
    assert_eq!(queued[0].enqueued_at, t(120));

    assert_eq!(store.replay_dead_letter(id, t(130)).unwrap(), None);
  }

  #[test]
  fn test_byte_estimate_counts_payloads() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.byte_estimate(&Partition::ALL).unwrap(), 0);

    store
      .put(Partition::Dashboard, &record("k", json!("ab"), t(0)))
      .unwrap();
    // key "k" + payload "\"ab\""
    assert_eq!(store.byte_estimate(&[Partition::Dashboard]).unwrap(), 5);

    store
      .push_task(SyncAction::CreateTask, &json!(1), t(0) + Duration::seconds(1))
      .unwrap();
    assert_eq!(
      store
        .byte_estimate(&[Partition::Dashboard, Partition::SyncQueue])
        .unwrap(),
      5 + "CREATE_TASK".len() as u64 + 1
    );
  }

  #[test]
  fn test_closed_store_fails() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.close();
    let err = store.get(Partition::Dashboard, "stats").unwrap_err();
    assert_eq!(EngineError::find(&err), Some(&EngineError::StoreClosed));
  }

  #[test]
  fn test_noop_store_misses_and_refuses_queueing() {
    let store = NoopStore;
    store
      .put(Partition::Dashboard, &record("stats", json!({}), t(0)))
      .unwrap();
    assert_eq!(store.get(Partition::Dashboard, "stats").unwrap(), None);
    assert!(!store.is_available());

    let err = store
      .push_task(SyncAction::CreateTask, &json!({}), t(0))
      .unwrap_err();
    assert_eq!(EngineError::find(&err), Some(&EngineError::StoreUnavailable));
  }
}
