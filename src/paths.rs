//! Home-based storage paths: `~/.chat-session/` unless `CHAT_SESSION_HOME`
//! points elsewhere.
//!
//! - `config.yaml` - client and demo server configuration
//! - `session-debug.log` - lifecycle debug log

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const CHAT_SESSION_DIR: &str = ".chat-session";

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "CHAT_SESSION_HOME";

/// Returns the home directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - The user's home directory cannot be determined
/// - Directory creation fails
pub fn chat_session_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(CHAT_SESSION_DIR),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the default config path: `<home>/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(chat_session_home_dir()?.join("config.yaml"))
}

/// Returns the debug log path: `<home>/session-debug.log`
pub fn session_log_path() -> Result<PathBuf> {
    Ok(chat_session_home_dir()?.join("session-debug.log"))
}
