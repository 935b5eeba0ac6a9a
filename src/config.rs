use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "shelfsync";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Where the database and logs live (defaults to $XDG_DATA_HOME/shelfsync)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_timeout", deserialize_with = "deserialize_secs")]
  pub timeout_secs: Duration,
  /// Endpoint probed to decide whether the API is reachable
  #[serde(default = "default_health_endpoint")]
  pub health_endpoint: String,
}

impl ApiConfig {
  /// Validated API base URL.
  pub fn url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid api.base_url '{}': {}", self.base_url, e))
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout(),
      health_endpoint: default_health_endpoint(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to run every read against the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default)]
  pub ttl: CacheTtls,
  /// How long stored results stay available for offline reads
  #[serde(default = "default_retention_hours")]
  pub retention_hours: u64,
  #[serde(default = "default_cleanup_interval", deserialize_with = "deserialize_secs")]
  pub cleanup_interval_secs: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl: CacheTtls::default(),
      retention_hours: default_retention_hours(),
      cleanup_interval_secs: default_cleanup_interval(),
    }
  }
}

impl CacheConfig {
  pub fn retention(&self) -> Option<Duration> {
    match self.retention_hours {
      0 => None,
      hours => Some(Duration::from_secs(hours.saturating_mul(3600))),
    }
  }
}

/// Per-resource freshness windows, in seconds in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
  #[serde(deserialize_with = "deserialize_secs")]
  pub dashboard: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub pipeline: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub books: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub book: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub paths: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub stats: Duration,
  #[serde(deserialize_with = "deserialize_secs")]
  pub settings: Duration,
}

impl Default for CacheTtls {
  fn default() -> Self {
    Self {
      dashboard: Duration::from_secs(60),
      pipeline: Duration::from_secs(60),
      books: Duration::from_secs(30),
      book: Duration::from_secs(5 * 60),
      paths: Duration::from_secs(60),
      stats: Duration::from_secs(60),
      settings: Duration::from_secs(5 * 60),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How often reachability is probed
  #[serde(default = "default_probe_interval", deserialize_with = "deserialize_secs")]
  pub probe_interval_secs: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:5001/api".to_string()
}

fn default_timeout() -> Duration {
  Duration::from_secs(30)
}

fn default_health_endpoint() -> String {
  "/auth/check".to_string()
}

fn default_true() -> bool {
  true
}

fn default_retention_hours() -> u64 {
  24 * 7
}

fn default_cleanup_interval() -> Duration {
  Duration::from_secs(5 * 60)
}

fn default_probe_interval() -> Duration {
  Duration::from_secs(15)
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let secs = u64::deserialize(deserializer)?;
  Ok(Duration::from_secs(secs))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shelfsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shelfsync/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
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
      None => {
        info!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shelfsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.api.url()?;
    Ok(config)
  }

  /// Directory holding the database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(ref dir) = self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_NAME))
  }

  /// Get the API token from the environment, if any.
  ///
  /// Checks SHELFSYNC_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("SHELFSYNC_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
