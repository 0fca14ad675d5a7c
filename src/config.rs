use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_MAX_RECORDS;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub tmdb: TmdbConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbConfig {
  /// Base URL of the catalog API, without a trailing slash
  #[serde(default = "default_api_url")]
  pub api_url: String,
  /// Base URL for image assets (the size segment is appended per kind)
  #[serde(default = "default_image_base_url")]
  pub image_base_url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for TmdbConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      image_base_url: default_image_base_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl TmdbConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Upper bound on cached movie records
  #[serde(default = "default_max_records")]
  pub max_records: usize,
  /// Overrides the platform data directory
  pub data_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_records: default_max_records(),
      data_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// Host probed for reachability (defaults to the API host)
  pub probe_host: Option<String>,
  #[serde(default = "default_probe_port")]
  pub probe_port: u16,
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  #[serde(default = "default_probe_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_host: None,
      probe_port: default_probe_port(),
      interval_secs: default_interval_secs(),
      timeout_secs: default_probe_timeout_secs(),
    }
  }
}

impl ConnectivityConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
  /// Quiet period before a search request is issued
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
    }
  }
}

impl SearchConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

fn default_api_url() -> String {
  "https://api.themoviedb.org/3".to_string()
}

fn default_image_base_url() -> String {
  "https://image.tmdb.org/t/p".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_records() -> usize {
  DEFAULT_MAX_RECORDS
}

fn default_probe_port() -> u16 {
  443
}

fn default_interval_secs() -> u64 {
  10
}

fn default_probe_timeout_secs() -> u64 {
  3
}

fn default_debounce_ms() -> u64 {
  300
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./alongside.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/alongside/config.yaml
  ///
  /// Unlike an explicit path, a missing file in the default locations is not
  /// an error: every setting has a default.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("alongside.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("alongside").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  /// Reject values the cache and probe cannot run with.
  pub fn validate(&self) -> Result<()> {
    if !(1..=DEFAULT_MAX_RECORDS).contains(&self.cache.max_records) {
      return Err(eyre!(
        "cache.max_records must be between 1 and {}, got {}",
        DEFAULT_MAX_RECORDS,
        self.cache.max_records
      ));
    }
    if self.tmdb.timeout_secs == 0 {
      return Err(eyre!("tmdb.timeout_secs must be greater than zero"));
    }
    if self.connectivity.interval_secs == 0 {
      return Err(eyre!("connectivity.interval_secs must be greater than zero"));
    }
    if self.connectivity.timeout_secs == 0 {
      return Err(eyre!("connectivity.timeout_secs must be greater than zero"));
    }
    Ok(())
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty document deserializes as unit, not as an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Directory holding the record database, image files and the log.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("alongside"))
  }

  /// Host checked by the connectivity probe: the configured one, else the
  /// API host.
  pub fn probe_host(&self) -> Result<String> {
    if let Some(host) = &self.connectivity.probe_host {
      return Ok(host.clone());
    }

    let api = url::Url::parse(&self.tmdb.api_url)
      .map_err(|e| eyre!("Invalid tmdb.api_url {}: {}", self.tmdb.api_url, e))?;
    api
      .host_str()
      .map(str::to_string)
      .ok_or_else(|| eyre!("tmdb.api_url has no host: {}", self.tmdb.api_url))
  }

  /// Get the TMDb read access token from environment variables.
  ///
  /// Checks ALONGSIDE_TMDB_TOKEN first, then TMDB_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Result<String> {
    std::env::var("ALONGSIDE_TMDB_TOKEN")
      .or_else(|_| std::env::var("TMDB_ACCESS_TOKEN"))
      .map_err(|_| {
        eyre!(
          "TMDb access token not found. Set ALONGSIDE_TMDB_TOKEN or TMDB_ACCESS_TOKEN environment variable."
        )
      })
  }
}
