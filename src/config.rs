use crate::fanout::DEFAULT_REPLAY_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `session.inactivity_threshold_secs`.
pub const INACTIVITY_ENV: &str = "CHAT_SESSION_INACTIVITY_SECS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Client-side session policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Events kept for newly attached observers. Default: 200
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Idle time after which the session is torn down. Default: 300
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
    /// Deadline for the establishment handshake. Default: 10
    #[serde(default = "default_establish_timeout_secs")]
    pub establish_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            establish_timeout_secs: default_establish_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn establish_timeout(&self) -> Duration {
        Duration::from_secs(self.establish_timeout_secs)
    }
}

fn default_replay_capacity() -> usize {
    DEFAULT_REPLAY_CAPACITY
}

fn default_inactivity_threshold_secs() -> u64 {
    300
}

fn default_establish_timeout_secs() -> u64 {
    10
}

/// Chat server endpoint, and the demo server's own settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address of the chat service. Default: 127.0.0.1:17800
    #[serde(default = "default_address")]
    pub address: String,
    /// Port the demo server accepts push subscribers on. Default: 17801
    #[serde(default = "default_subscriber_port")]
    pub subscriber_port: u16,
    /// Session timeout the demo server negotiates. Default: 60
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Accounts accepted by the demo server (user -> password).
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            subscriber_port: default_subscriber_port(),
            session_timeout_secs: default_session_timeout_secs(),
            accounts: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

fn default_address() -> String {
    "127.0.0.1:17800".to_string()
}

fn default_subscriber_port() -> u16 {
    17801
}

fn default_session_timeout_secs() -> u64 {
    60
}

/// Retry policy for the initial connection. Never used after a session is
/// established.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Fixed delay between attempts. Default: 5
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
    /// Attempts before giving up; unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_retry_delay_secs(),
            max_attempts: None,
        }
    }
}

fn default_retry_delay_secs() -> u64 {
    5
}

impl ChatConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: ChatConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `path` if given, else the default location; a missing default
    /// file yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = crate::paths::config_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = std::env::var(INACTIVITY_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.session.inactivity_threshold_secs = secs;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
