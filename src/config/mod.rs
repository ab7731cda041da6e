use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config file '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config file '{path}': {source}")]
  Parse {
    path: String,
    #[source]
    source: toml::de::Error,
  },
}

/// Log configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LogConfig {
  /// Log file path, if not set, logs will be printed to stdout
  pub file: Option<String>,
  /// Log level, default is "info"
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      file: None,
      level: default_log_level(),
    }
  }
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
  /// Listen address, `:port` binds every interface
  #[serde(default = "default_listen")]
  pub listen: String,

  /// JSON array file holding the client credentials
  #[serde(default = "default_creds")]
  pub creds: String,

  /// Time allowed for reading a request body
  #[serde(default = "default_read_timeout_secs")]
  pub read_timeout_secs: u64,

  /// Time allowed for a whole request, response included
  #[serde(default = "default_write_timeout_secs")]
  pub write_timeout_secs: u64,
}

fn default_listen() -> String {
  ":8080".to_string()
}

fn default_creds() -> String {
  "creds.json".to_string()
}

fn default_read_timeout_secs() -> u64 {
  15
}

fn default_write_timeout_secs() -> u64 {
  30
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
      creds: default_creds(),
      read_timeout_secs: default_read_timeout_secs(),
      write_timeout_secs: default_write_timeout_secs(),
    }
  }
}

impl ServerConfig {
  /// Socket address to bind, with Go-style `:8080` expanded to `0.0.0.0:8080`
  pub fn bind_addr(&self) -> String {
    if self.listen.starts_with(':') {
      format!("0.0.0.0{}", self.listen)
    } else {
      self.listen.clone()
    }
  }

  pub fn read_timeout(&self) -> Duration {
    Duration::from_secs(self.read_timeout_secs)
  }

  pub fn write_timeout(&self) -> Duration {
    Duration::from_secs(self.write_timeout_secs)
  }
}

/// Command-line client configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClientConfig {
  /// Per-request timeout in milliseconds
  #[serde(default = "default_client_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_client_timeout_ms() -> u64 {
  1000
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      timeout_ms: default_client_timeout_ms(),
    }
  }
}

impl ClientConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// kvstore configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
  /// Server configuration
  #[serde(default)]
  pub server: ServerConfig,

  /// Client configuration
  #[serde(default)]
  pub client: ClientConfig,

  /// Log configuration
  #[serde(default)]
  pub log: LogConfig,
}

impl Config {
  /// Load configuration from TOML file
  pub fn from_file(path: &str) -> Result<Self, ConfigError> {
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_string(),
      source,
    })?;

    toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
      path: path.to_string(),
      source,
    })
  }
}
