//! RPC definitions for the chat service and its push callbacks.

pub mod chat_service;

use serde::{Deserialize, Serialize};

/// Errors returned by chat service methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatError {
    /// Unknown user or wrong password
    AuthenticationFailed,
    /// Session expired, logged out, or never existed
    SessionNotFound { session_id: String },
    /// Internal error
    Internal { message: String },
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::AuthenticationFailed => write!(f, "Authentication failed"),
            ChatError::SessionNotFound { session_id } => {
                write!(f, "Session not found: {}", session_id)
            }
            ChatError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for ChatError {}

/// Result type for chat service operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Returned by a successful `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginReply {
    pub session_id: String,
    pub hostname: String,
    /// Users logged in at the time of login, including the caller.
    pub roster: Vec<String>,
    /// Sessions not pinged within this many seconds are expired.
    pub session_timeout_secs: u64,
    /// Port to connect to for push callbacks.
    pub subscriber_port: u16,
}
