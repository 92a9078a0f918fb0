use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL all endpoint paths are joined onto
  pub url: String,
  #[serde(default = "default_api_timeout")]
  pub timeout_secs: u64,
  /// Sent as the `X-Source` header
  #[serde(default = "default_client_name")]
  pub client_name: String,
}

fn default_api_timeout() -> u64 {
  10
}

fn default_client_name() -> String {
  "nest-hub".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/offline-sync/offline.db)
  pub path: Option<PathBuf>,
}

/// Longest cache age accepted from configuration (one year).
pub const MAX_CACHE_AGE_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_secs: u64,
  pub cleanup_interval_secs: u64,
  pub max_cache_age_secs: u64,
  pub max_attempts: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 5 * 60,
      cleanup_interval_secs: 60 * 60,
      max_cache_age_secs: 24 * 60 * 60,
      max_attempts: 3,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: 30,
      probe_timeout_secs: 2,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-sync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Reject settings the engine can't run with.
  pub fn validate(&self) -> Result<()> {
    Url::parse(&self.api.url).map_err(|e| eyre!("api.url '{}' is not a URL: {}", self.api.url, e))?;

    if self.network.probe_timeout_secs >= self.api.timeout_secs {
      return Err(eyre!(
        "network.probe_timeout_secs ({}) must be shorter than api.timeout_secs ({})",
        self.network.probe_timeout_secs,
        self.api.timeout_secs
      ));
    }
    if self.sync.interval_secs == 0 || self.sync.cleanup_interval_secs == 0 {
      return Err(eyre!("Sync and cleanup intervals must be greater than zero"));
    }
    if self.network.probe_interval_secs == 0 {
      return Err(eyre!("network.probe_interval_secs must be greater than zero"));
    }
    if self.sync.max_cache_age_secs == 0 || self.sync.max_cache_age_secs > MAX_CACHE_AGE_SECS {
      return Err(eyre!(
        "sync.max_cache_age_secs must be between 1 and {}, got {}",
        MAX_CACHE_AGE_SECS,
        self.sync.max_cache_age_secs
      ));
    }
    if self.sync.max_attempts == 0 {
      return Err(eyre!("sync.max_attempts must be at least 1"));
    }
    Ok(())
  }

  pub fn api_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs)
  }

  pub fn cleanup_interval(&self) -> Duration {
    Duration::from_secs(self.sync.cleanup_interval_secs)
  }

  /// Clamped to [`MAX_CACHE_AGE_SECS`] for configs that skipped validation.
  pub fn max_cache_age(&self) -> chrono::Duration {
    let secs = self.sync.max_cache_age_secs.min(MAX_CACHE_AGE_SECS) as i64;
    chrono::Duration::try_seconds(secs).unwrap_or_else(|| chrono::Duration::hours(24))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.network.probe_interval_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.network.probe_timeout_secs)
  }

  /// Get the API bearer token from the environment.
  ///
  /// Checks OFFLINE_SYNC_API_TOKEN. Requests go out unauthenticated without it.
  pub fn get_api_token() -> Option<String> {
    std::env::var("OFFLINE_SYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
