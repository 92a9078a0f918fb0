pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub use schema::{IndexSpec, Partition, CURRENT_SCHEMA_VERSION};

/// Database connection wrapper for the offline store
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at `path`, migrating it up to `schema_version`
  pub fn open(path: &Path, schema_version: u32) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to enable WAL journal: {}", e))?;

    let mut db = Self { conn };
    db.migrate(schema_version)?;

    info!(path = %path.display(), schema_version, "Offline store opened");
    Ok(db)
  }

  /// Open a throwaway in-memory database
  pub fn open_in_memory(schema_version: u32) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let mut db = Self { conn };
    db.migrate(schema_version)?;
    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-sync").join("offline.db"))
  }

  /// Schema version recorded in the database header
  pub fn schema_version(&self) -> Result<u32> {
    self
      .conn
      .pragma_query_value(None, "user_version", |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))
  }

  /// Run migrations up to `target`.
  ///
  /// Every migration up to the target is replayed; they only create missing
  /// tables and indexes, so existing partitions and their rows are untouched.
  /// A target at or below the recorded version is a no-op.
  pub fn migrate(&mut self, target: u32) -> Result<()> {
    let current = self.schema_version()?;
    if target <= current {
      debug!(current, target, "Schema up to date");
      return Ok(());
    }

    let tx = self
      .conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin migration: {}", e))?;

    for migration in schema::MIGRATIONS.iter().filter(|m| m.version <= target) {
      tx.execute_batch(migration.sql)
        .map_err(|e| eyre!("Failed to run migration {}: {}", migration.version, e))?;
    }

    tx.pragma_update(None, "user_version", target)
      .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit migration: {}", e))?;

    info!(from = current, to = target, "Schema migrated");
    Ok(())
  }

  /// Get a reference to the connection
  pub fn conn(&self) -> &Connection {
    &self.conn
  }

  pub fn conn_mut(&mut self) -> &mut Connection {
    &mut self.conn
  }
}
