//! Error types for the session manager.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Errors returned to callers of the session manager.
///
/// Establishment failures (`Auth`, `Connect`, `Timeout`) are reported only to
/// the establishing caller; observers never see them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Credentials were rejected by the remote side.
    Auth { message: String },
    /// The remote endpoint could not be reached.
    Connect { message: String },
    /// Establishment did not complete within the configured deadline.
    Timeout { after: Duration },
    /// No session has been established on this manager.
    NoSession,
    /// A session is live or an establishment is already in flight.
    AlreadyActive,
}

impl SessionError {
    /// Returns true for failures the registration retry policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { message } => write!(f, "authentication failed: {}", message),
            Self::Connect { message } => write!(f, "connection failed: {}", message),
            Self::Timeout { after } => {
                write!(f, "session establishment timed out after {:?}", after)
            }
            Self::NoSession => write!(f, "no session established"),
            Self::AlreadyActive => write!(f, "a session is already active"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyReason {
    /// Explicit logout. Observers are not notified.
    Logout,
    /// No outbound activity within the inactivity threshold.
    Inactivity,
    /// Transport failure or an error pushed by the remote side.
    Error(String),
}

impl DestroyReason {
    /// The error message to fan out, if this reason produces an `on_error`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) if !message.is_empty() => Some(message.as_str()),
            _ => None,
        }
    }
}

impl Display for DestroyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::Inactivity => write!(f, "inactivity"),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}
