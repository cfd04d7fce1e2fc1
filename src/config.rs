use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CacheStorage, FileStorage, NoopStorage, SqliteStorage};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub github: GitHubConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sampling: SamplingConfig,
  #[serde(default)]
  pub issues: IssuesConfig,
  /// Write logs to this file in addition to stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
  /// API root, e.g. https://github.example.com/api/v3 for GitHub Enterprise
  #[serde(default = "default_api_url")]
  pub api_url: String,
  /// Added to the user agent so requests can be attributed
  pub username: Option<String>,
  #[serde(default = "default_per_page")]
  pub per_page: u32,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      api_url: default_api_url(),
      username: None,
      per_page: default_per_page(),
    }
  }
}

fn default_api_url() -> String {
  "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
  100
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// One JSON file per repository and category
  #[default]
  File,
  /// All caches in a single SQLite database
  Sqlite,
  /// Caching disabled - every run fetches the full history
  None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache root (default: $XDG_DATA_HOME/ghstats)
  pub dir: Option<PathBuf>,
  #[serde(default)]
  pub backend: CacheBackend,
  /// Complete caches younger than this are used without contacting GitHub
  #[serde(default = "default_refresh_after_minutes")]
  pub refresh_after_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: None,
      backend: CacheBackend::default(),
      refresh_after_minutes: default_refresh_after_minutes(),
    }
  }
}

fn default_refresh_after_minutes() -> i64 {
  5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
  #[serde(default = "default_interval_days")]
  pub interval_days: u32,
}

impl Default for SamplingConfig {
  fn default() -> Self {
    Self {
      interval_days: default_interval_days(),
    }
  }
}

fn default_interval_days() -> u32 {
  7
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesConfig {
  /// Issues and pull requests closed this quickly are left out of statistics.
  /// Imported closed items show up like this.
  #[serde(default = "default_ignore_closed_within_secs")]
  pub ignore_closed_within_secs: u64,
}

impl Default for IssuesConfig {
  fn default() -> Self {
    Self {
      ignore_closed_within_secs: default_ignore_closed_within_secs(),
    }
  }
}

fn default_ignore_closed_within_secs() -> u64 {
  60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ghstats.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ghstats/config.yaml
  ///
  /// Without any file the defaults are used.
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
    // Check current directory
    let local = PathBuf::from("ghstats.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ghstats").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the GitHub API token from environment variables.
  ///
  /// Checks GHSTATS_TOKEN first, then GITHUB_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("GHSTATS_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }

  /// Cache root directory.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ghstats"))
  }

  /// How long a complete cache is served without a remote call.
  pub fn stale_time(&self) -> Result<Duration> {
    let minutes = self.cache.refresh_after_minutes;
    if minutes < 0 {
      return Err(eyre!("cache.refresh_after_minutes must not be negative, got {}", minutes));
    }
    Duration::try_minutes(minutes)
      .ok_or_else(|| eyre!("cache.refresh_after_minutes is out of range: {}", minutes))
  }

  /// Issues and pull requests closed within this long of creation are ignored.
  pub fn ignore_closed_within(&self) -> Result<Duration> {
    let secs = self.issues.ignore_closed_within_secs;
    i64::try_from(secs)
      .ok()
      .and_then(Duration::try_seconds)
      .ok_or_else(|| eyre!("issues.ignore_closed_within_secs is out of range: {}", secs))
  }

  /// Open the configured cache backend.
  pub fn open_storage(&self) -> Result<Box<dyn CacheStorage>> {
    let storage: Box<dyn CacheStorage> = match self.cache.backend {
      CacheBackend::File => Box::new(FileStorage::new(self.cache_dir()?)),
      CacheBackend::Sqlite => Box::new(SqliteStorage::open(&self.cache_dir()?.join("cache.db"))?),
      CacheBackend::None => Box::new(NoopStorage),
    };
    Ok(storage)
  }
}
