//! Core types for the caching system.

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde::Serialize;
use serde_json::Value;
use std::ops::Bound;

/// A record as persisted in a record partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
  pub key: String,
  pub payload: Value,
  /// Stamped on every write
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data served because the live fetch failed while online.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFallback,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source != CacheSource::Network
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network fetch failed, serving fresh-enough cached data
  CacheFallback,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

/// A value an index can be queried with.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
  Integer(i64),
  Real(f64),
  Text(String),
}

impl From<i64> for IndexValue {
  fn from(v: i64) -> Self {
    IndexValue::Integer(v)
  }
}

impl From<f64> for IndexValue {
  fn from(v: f64) -> Self {
    IndexValue::Real(v)
  }
}

impl From<&str> for IndexValue {
  fn from(v: &str) -> Self {
    IndexValue::Text(v.to_string())
  }
}

impl From<String> for IndexValue {
  fn from(v: String) -> Self {
    IndexValue::Text(v)
  }
}

/// Timestamps index as epoch milliseconds, the same way they are stored.
impl From<DateTime<Utc>> for IndexValue {
  fn from(v: DateTime<Utc>) -> Self {
    IndexValue::Integer(v.timestamp_millis())
  }
}

impl ToSql for IndexValue {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::Owned(match self {
      IndexValue::Integer(v) => SqlValue::Integer(*v),
      IndexValue::Real(v) => SqlValue::Real(*v),
      IndexValue::Text(v) => SqlValue::Text(v.clone()),
    }))
  }
}

/// Range over an index, bounds open or closed.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
  pub lower: Bound<IndexValue>,
  pub upper: Bound<IndexValue>,
}

impl KeyRange {
  pub fn only(value: impl Into<IndexValue>) -> Self {
    let value = value.into();
    Self {
      lower: Bound::Included(value.clone()),
      upper: Bound::Included(value),
    }
  }

  pub fn lower_bound(value: impl Into<IndexValue>, open: bool) -> Self {
    Self {
      lower: bound(value.into(), open),
      upper: Bound::Unbounded,
    }
  }

  pub fn upper_bound(value: impl Into<IndexValue>, open: bool) -> Self {
    Self {
      lower: Bound::Unbounded,
      upper: bound(value.into(), open),
    }
  }

  pub fn between(
    lower: impl Into<IndexValue>,
    upper: impl Into<IndexValue>,
    lower_open: bool,
    upper_open: bool,
  ) -> Self {
    Self {
      lower: bound(lower.into(), lower_open),
      upper: bound(upper.into(), upper_open),
    }
  }

  /// SQL predicate over `expr` plus the values to bind, in order.
  pub(crate) fn to_sql_predicate(&self, expr: &str) -> (String, Vec<IndexValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    match &self.lower {
      Bound::Included(v) => {
        clauses.push(format!("{} >= ?", expr));
        values.push(v.clone());
      }
      Bound::Excluded(v) => {
        clauses.push(format!("{} > ?", expr));
        values.push(v.clone());
      }
      Bound::Unbounded => {}
    }
    match &self.upper {
      Bound::Included(v) => {
        clauses.push(format!("{} <= ?", expr));
        values.push(v.clone());
      }
      Bound::Excluded(v) => {
        clauses.push(format!("{} < ?", expr));
        values.push(v.clone());
      }
      Bound::Unbounded => {}
    }

    if clauses.is_empty() {
      clauses.push(format!("{} IS NOT NULL", expr));
    }
    (clauses.join(" AND "), values)
  }
}

fn bound(value: IndexValue, open: bool) -> Bound<IndexValue> {
  if open {
    Bound::Excluded(value)
  } else {
    Bound::Included(value)
  }
}
