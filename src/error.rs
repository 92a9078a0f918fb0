//! Error conditions callers need to tell apart.
//!
//! Everything else in the crate reports through `color_eyre::Result` with a
//! contextual message. These variants travel inside the report and are
//! recovered with `Report::downcast_ref::<EngineError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  /// Live fetch failed or was skipped, and the cache had nothing fresh.
  #[error("No data available for {resource}")]
  NoDataAvailable { resource: String },

  #[error("Cannot sync while offline")]
  Offline,

  /// The local store could not be opened; the engine runs without offline support.
  #[error("Offline support unavailable")]
  StoreUnavailable,

  #[error("Store is closed")]
  StoreClosed,

  #[error("Partition {0} does not hold cache records")]
  UnsupportedPartition(&'static str),

  #[error("Record for partition {partition} has no '{key_path}' field and no explicit key")]
  MissingKey {
    partition: &'static str,
    key_path: &'static str,
  },

  #[error("Partition {partition} has no index named {index}")]
  UnknownIndex {
    partition: &'static str,
    index: String,
  },
}

impl EngineError {
  /// Find an `EngineError` anywhere in a report's chain.
  pub fn find(report: &color_eyre::Report) -> Option<&EngineError> {
    report.chain().find_map(|e| e.downcast_ref::<EngineError>())
  }
}
