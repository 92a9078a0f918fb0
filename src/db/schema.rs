//! Partition layout and schema migrations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Latest schema version understood by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// A named logical collection inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Partition {
  Dashboard,
  Tasks,
  Meetings,
  Crm,
  SyncQueue,
  Settings,
}

/// A secondary index over a partition.
#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
  pub name: &'static str,
  /// SQL expression the index is built on
  pub expr: &'static str,
}

const TIMESTAMP: IndexSpec = IndexSpec {
  name: "timestamp",
  expr: "cached_at",
};

const DASHBOARD_INDEXES: &[IndexSpec] = &[TIMESTAMP];

const TASKS_INDEXES: &[IndexSpec] = &[
  IndexSpec {
    name: "status",
    expr: "json_extract(payload, '$.status')",
  },
  IndexSpec {
    name: "priority",
    expr: "json_extract(payload, '$.priority')",
  },
  IndexSpec {
    name: "dueDate",
    expr: "json_extract(payload, '$.dueDate')",
  },
  TIMESTAMP,
];

const MEETINGS_INDEXES: &[IndexSpec] = &[
  IndexSpec {
    name: "startTime",
    expr: "json_extract(payload, '$.startTime')",
  },
  IndexSpec {
    name: "status",
    expr: "json_extract(payload, '$.status')",
  },
  TIMESTAMP,
];

const CRM_INDEXES: &[IndexSpec] = &[
  IndexSpec {
    name: "type",
    expr: "json_extract(payload, '$.type')",
  },
  TIMESTAMP,
];

const SYNC_QUEUE_INDEXES: &[IndexSpec] = &[
  IndexSpec {
    name: "timestamp",
    expr: "enqueued_at",
  },
  IndexSpec {
    name: "action",
    expr: "action",
  },
];

impl Partition {
  pub const ALL: [Partition; 6] = [
    Partition::Dashboard,
    Partition::Tasks,
    Partition::Meetings,
    Partition::Crm,
    Partition::SyncQueue,
    Partition::Settings,
  ];

  /// Partitions holding TTL-governed cache records.
  pub const CACHE: [Partition; 4] = [
    Partition::Dashboard,
    Partition::Tasks,
    Partition::Meetings,
    Partition::Crm,
  ];

  /// Name used for display and configuration.
  pub fn name(self) -> &'static str {
    match self {
      Partition::Dashboard => "dashboard",
      Partition::Tasks => "tasks",
      Partition::Meetings => "meetings",
      Partition::Crm => "crm",
      Partition::SyncQueue => "syncQueue",
      Partition::Settings => "settings",
    }
  }

  /// Backing SQLite table.
  pub fn table(self) -> &'static str {
    match self {
      Partition::SyncQueue => "sync_queue",
      other => other.name(),
    }
  }

  /// Payload field that identifies a record when no explicit key is given.
  pub fn key_path(self) -> &'static str {
    match self {
      Partition::Dashboard => "endpoint",
      Partition::Tasks | Partition::Meetings | Partition::Crm | Partition::SyncQueue => "id",
      Partition::Settings => "key",
    }
  }

  pub fn indexes(self) -> &'static [IndexSpec] {
    match self {
      Partition::Dashboard => DASHBOARD_INDEXES,
      Partition::Tasks => TASKS_INDEXES,
      Partition::Meetings => MEETINGS_INDEXES,
      Partition::Crm => CRM_INDEXES,
      Partition::SyncQueue => SYNC_QUEUE_INDEXES,
      Partition::Settings => &[],
    }
  }

  pub fn index(self, name: &str) -> Option<&'static IndexSpec> {
    self.indexes().iter().find(|i| i.name == name)
  }

  pub fn is_cache(self) -> bool {
    Self::CACHE.contains(&self)
  }

  /// Whether the partition uses the generic key/payload/cached_at layout.
  pub fn holds_records(self) -> bool {
    self != Partition::SyncQueue
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Partition {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Partition::ALL
      .into_iter()
      .find(|p| p.name().eq_ignore_ascii_case(s) || p.table() == s)
      .ok_or_else(|| format!("unknown partition '{}'", s))
  }
}

/// A schema migration. Every statement must be idempotent so that replaying
/// a migration only creates what is missing.
pub struct Migration {
  pub version: u32,
  pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    sql: SCHEMA_V1,
  },
  Migration {
    version: 2,
    sql: SCHEMA_V2,
  },
];

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS dashboard (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS dashboard_timestamp ON dashboard(cached_at);

CREATE TABLE IF NOT EXISTS tasks (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS tasks_status ON tasks(json_extract(payload, '$.status'));
CREATE INDEX IF NOT EXISTS tasks_priority ON tasks(json_extract(payload, '$.priority'));
CREATE INDEX IF NOT EXISTS tasks_due_date ON tasks(json_extract(payload, '$.dueDate'));
CREATE INDEX IF NOT EXISTS tasks_timestamp ON tasks(cached_at);

CREATE TABLE IF NOT EXISTS meetings (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS meetings_start_time ON meetings(json_extract(payload, '$.startTime'));
CREATE INDEX IF NOT EXISTS meetings_status ON meetings(json_extract(payload, '$.status'));
CREATE INDEX IF NOT EXISTS meetings_timestamp ON meetings(cached_at);

CREATE TABLE IF NOT EXISTS crm (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS crm_type ON crm(json_extract(payload, '$.type'));
CREATE INDEX IF NOT EXISTS crm_timestamp ON crm(cached_at);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);
CREATE INDEX IF NOT EXISTS sync_queue_timestamp ON sync_queue(enqueued_at);
CREATE INDEX IF NOT EXISTS sync_queue_action ON sync_queue(action);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    cached_at INTEGER NOT NULL
);
"#;

const SCHEMA_V2: &str = r#"
-- Tasks that exhausted their retry budget, kept for inspection and replay
CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    dead_lettered_at INTEGER NOT NULL
);
"#;
