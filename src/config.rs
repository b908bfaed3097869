//! Application configuration.
//!
//! Loaded from a YAML file; a missing file means defaults. CLI flags
//! override file values.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// Config (root)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_yaml::from_str(&contents)?)
    }
}

// -----------------------------------------------------------------------------
// ServerConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// -----------------------------------------------------------------------------
// SessionConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Max wait for Side B to arrive after Side A's ping.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Max wait for a peer utterance per turn.
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_seconds: u64,
    /// Idle TTL before the sweep closes a session.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Hard directory capacity.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sweep period.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Inbound body cap.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Evict the most-idle session instead of refusing at capacity.
    #[serde(default = "default_evict_on_full")]
    pub evict_on_full: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: default_handshake_timeout(),
            turn_timeout_seconds: default_turn_timeout(),
            session_ttl_seconds: default_session_ttl(),
            max_sessions: default_max_sessions(),
            cleanup_interval_seconds: default_cleanup_interval(),
            max_payload_bytes: default_max_payload_bytes(),
            evict_on_full: default_evict_on_full(),
        }
    }
}

impl SessionConfig {
    pub fn handshake_budget(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn turn_budget(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_turn_timeout() -> u64 {
    30
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    100
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

fn default_evict_on_full() -> bool {
    true
}

// -----------------------------------------------------------------------------
// ObservabilityConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_enable_metrics(),
        }
    }
}

fn default_enable_metrics() -> bool {
    true
}
