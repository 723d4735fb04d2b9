use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::DEFAULT_TTL;
use crate::debounce::DEFAULT_DEBOUNCE;
use crate::error::{ApiError, Result};
use crate::filter::EmptyResultPolicy;

pub const API_URL_ENV: &str = "NOMAD_API_URL";
pub const API_TOKEN_ENV: &str = "NOMAD_API_TOKEN";

/// Every section is optional; a missing file means all defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub search: SearchConfig,
  pub filter: FilterConfig,
  pub logging: LoggingConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/api".to_string(),
      timeout_secs: 10,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_secs: u64,
  /// Bound for the per-entity sub-cache; unbounded when unset
  pub max_entities: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: DEFAULT_TTL.as_secs(),
      max_entities: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
  pub debounce_ms: u64,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
    }
  }
}

impl SearchConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
  pub empty_result_policy: EmptyResultPolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
  /// `EnvFilter` directive, e.g. "info" or "nomad=debug"
  pub level: String,
  /// Log file; stderr when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "warn".to_string(),
      file: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite file for the token and saved jobs
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./nomad.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/nomad/config.yaml
  ///
  /// Environment overrides are applied on top.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if p.exists() => Some(p.to_path_buf()),
      Some(p) => {
        return Err(ApiError::Config(format!(
          "Config file not found: {}",
          p.display()
        )))
      }
      None => Self::find_config_file(),
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    let config = config.with_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("nomad.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("nomad").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      ApiError::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_yaml(&contents).map_err(|e| match e {
      ApiError::Config(msg) => ApiError::Config(format!("{} ({})", msg, path.display())),
      other => other,
    })
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file parses as YAML null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
      .map_err(|e| ApiError::Config(format!("Failed to parse config: {}", e)))
  }

  /// Apply `NOMAD_API_URL` from `lookup`.
  pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
    self
  }

  pub fn validate(&self) -> Result<()> {
    Url::parse(&self.api.base_url).map_err(|e| {
      ApiError::Config(format!("Invalid api.base_url '{}': {}", self.api.base_url, e))
    })?;
    if self.api.timeout_secs == 0 {
      return Err(ApiError::Config("api.timeout_secs must be positive".to_string()));
    }
    Ok(())
  }

  /// Token to seed into storage, from `NOMAD_API_TOKEN`.
  pub fn api_token() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api.base_url, "http://localhost:8000/api");
    assert_eq!(config.api.timeout(), Duration::from_secs(10));
    assert_eq!(config.cache.ttl(), Duration::from_secs(300));
    assert_eq!(config.cache.max_entities, None);
    assert_eq!(config.search.debounce(), Duration::from_millis(500));
    assert_eq!(
      config.filter.empty_result_policy,
      EmptyResultPolicy::FallbackToSource
    );
    config.validate().unwrap();
  }

  #[test]
  fn test_partial_yaml() {
    let config = Config::from_yaml(
      "api:\n  base_url: https://nomad.example/api\ncache:\n  max_entities: 500\nfilter:\n  empty_result_policy: show_empty\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "https://nomad.example/api");
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.cache.max_entities, Some(500));
    assert_eq!(config.filter.empty_result_policy, EmptyResultPolicy::ShowEmpty);
  }

  #[test]
  fn test_empty_file_is_default() {
    assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
  }

  #[test]
  fn test_env_override() {
    let config = Config::default().with_env_overrides(|key| match key {
      API_URL_ENV => Some("http://api.internal:9000/api".to_string()),
      _ => None,
    });
    assert_eq!(config.api.base_url, "http://api.internal:9000/api");
  }

  #[test]
  fn test_invalid_values_rejected() {
    let mut config = Config::default();
    config.api.base_url = "not a url".to_string();
    assert!(matches!(config.validate(), Err(ApiError::Config(_))));

    let mut config = Config::default();
    config.api.timeout_secs = 0;
    assert!(config.validate().is_err());

    assert!(Config::from_yaml("cache: [1, 2]").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nomad.yaml");
    std::fs::write(&path, "logging:\n  level: debug\n").unwrap();
    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.logging.level, "debug");
  }
}
