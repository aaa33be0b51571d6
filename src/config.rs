use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub upstream: UpstreamConfig,
  pub auth: AuthConfig,
  pub mirror: MirrorConfig,
  /// What to do when some subscriptions fail during a multi-subscription case listing
  pub fallback: FallbackPolicy,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub bind: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "0.0.0.0:5000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  pub base_url: String,
  pub api_version: String,
  /// Total per-request timeout
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
  /// Upper bound on `nextLink` pages followed by one listing
  pub max_pages: usize,
  pub retry: RetryConfig,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      base_url: "https://management.azure.com".to_string(),
      api_version: "2020-04-01".to_string(),
      timeout_secs: 30,
      connect_timeout_secs: 10,
      max_pages: 100,
      retry: RetryConfig::default(),
    }
  }
}

impl UpstreamConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Retries after the first attempt; 0 disables retrying
  pub max_retries: u32,
  pub base_backoff_ms: u64,
  pub max_backoff_ms: u64,
  pub jitter_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_backoff_ms: 200,
      max_backoff_ms: 5_000,
      jitter_ms: 100,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  pub authority_url: String,
  pub scope: String,
  /// Subtracted from the provider's token lifetime before caching
  pub safety_margin_secs: u64,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      authority_url: "https://login.microsoftonline.com".to_string(),
      scope: "https://management.azure.com/.default".to_string(),
      safety_margin_secs: 300,
    }
  }
}

impl AuthConfig {
  pub fn safety_margin(&self) -> Duration {
    Duration::from_secs(self.safety_margin_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
  pub enabled: bool,
  /// Database location (defaults to the XDG data directory)
  pub path: Option<PathBuf>,
}

impl Default for MirrorConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl MirrorConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.path {
      return Ok(p.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("casegate").join("mirror.db"))
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
  /// Failed subscriptions are filled from the mirror, successful ones stay live
  #[default]
  PerSubscription,
  /// Any failed subscription discards all live results and serves the mirror
  Global,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// EnvFilter directive, overridden by RUST_LOG
  pub filter: Option<String>,
  /// Directory for a daily-rolling log file
  pub dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./casegate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/casegate/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
    let local = PathBuf::from("casegate.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("casegate").join("config.yaml");
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

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty document deserializes as unit, not as a struct
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

/// Service principal credentials for the identity provider.
///
/// Only ever read from the environment; never written to config files,
/// logs or the mirror.
#[derive(Clone)]
pub struct Credentials {
  pub tenant_id: String,
  pub client_id: String,
  pub client_secret: String,
}

impl Credentials {
  /// Read AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET.
  pub fn from_env() -> Result<Self> {
    Ok(Self {
      tenant_id: require_env("AZURE_TENANT_ID")?,
      client_id: require_env("AZURE_CLIENT_ID")?,
      client_secret: require_env("AZURE_CLIENT_SECRET")?,
    })
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("tenant_id", &self.tenant_id)
      .field("client_id", &self.client_id)
      .field("client_secret", &"<redacted>")
      .finish()
  }
}

fn require_env(name: &str) -> Result<String> {
  std::env::var(name)
    .ok()
    .filter(|v| !v.trim().is_empty())
    .ok_or_else(|| eyre!("{} is not set. Export it or add it to .env", name))
}
