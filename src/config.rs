use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SqliteStorage;

/// Redmine answers at most this many records per page.
pub const MAX_PAGE_SIZE: u64 = 100;

/// Process-level settings. Redmine credentials are not here: they live in
/// the persisted profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub poll: PollConfig,
  pub sync: SyncConfig,
  pub http: HttpConfig,
  pub storage: StorageConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  /// Delay after a successful cycle and the backoff floor
  pub min_interval_minutes: u64,
  /// Backoff ceiling
  pub max_interval_minutes: u64,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      min_interval_minutes: 5,
      max_interval_minutes: 60,
    }
  }
}

impl PollConfig {
  pub fn min_interval(&self) -> Duration {
    Duration::from_secs(self.min_interval_minutes * 60)
  }

  pub fn max_interval(&self) -> Duration {
    Duration::from_secs(self.max_interval_minutes * 60)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Page size for the assigned-issues sync
  pub issue_page_size: u64,
  /// Page size for per-project issue lists
  pub project_issue_page_size: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      issue_page_size: 25,
      project_issue_page_size: 50,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      connect_timeout_secs: 10,
      user_agent: concat!("redmine-sync/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl HttpConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite file (default: $XDG_DATA_HOME/redmine-sync/cache.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Directory for rolling log files (default: next to the database)
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./redmine-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/redmine-sync/config.yaml
  ///
  /// With no file found the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("redmine-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("redmine-sync").join("config.yaml");
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
    // An empty document is valid and means "all defaults".
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn validate(&self) -> Result<()> {
    if self.poll.min_interval_minutes == 0 {
      return Err(eyre!("poll.min_interval_minutes must be at least 1"));
    }
    if self.poll.min_interval_minutes > self.poll.max_interval_minutes {
      return Err(eyre!(
        "poll.min_interval_minutes ({}) exceeds poll.max_interval_minutes ({})",
        self.poll.min_interval_minutes,
        self.poll.max_interval_minutes
      ));
    }
    for (name, size) in [
      ("sync.issue_page_size", self.sync.issue_page_size),
      ("sync.project_issue_page_size", self.sync.project_issue_page_size),
    ] {
      if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(eyre!("{} must be between 1 and {}, got {}", name, MAX_PAGE_SIZE, size));
      }
    }
    Ok(())
  }

  /// Get the Redmine API key from the environment.
  ///
  /// Checks REDMINE_SYNC_API_KEY first, then REDMINE_API_KEY as fallback.
  pub fn api_key_from_env() -> Option<String> {
    std::env::var("REDMINE_SYNC_API_KEY")
      .or_else(|_| std::env::var("REDMINE_API_KEY"))
      .ok()
      .filter(|key| !key.is_empty())
  }
}
