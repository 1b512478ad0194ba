//! Collaborators the session manager consumes: the remote session handle and
//! the authenticator that produces it.

use crate::errors::SessionError;
use crate::observer::ChatEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Handle to an established remote session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Keeps the remote session alive.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Posts a chat message.
    async fn send(&self, text: &str) -> anyhow::Result<()>;

    /// Best-effort release of the remote session.
    async fn destroy_session(&self) -> anyhow::Result<()>;
}

/// Event pushed by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Join {
        at: DateTime<Utc>,
        name: String,
    },
    Leave {
        at: DateTime<Utc>,
        name: String,
    },
    Message {
        at: DateTime<Utc>,
        name: String,
        text: String,
    },
    /// The remote side reports the session as broken.
    Error {
        message: String,
    },
}

impl PushEvent {
    /// Splits a push into a chat event or an error message.
    pub fn into_chat_event(self) -> Result<ChatEvent, String> {
        match self {
            Self::Join { at, name } => Ok(ChatEvent::Join { at, name }),
            Self::Leave { at, name } => Ok(ChatEvent::Leave { at, name }),
            Self::Message { at, name, text } => Ok(ChatEvent::Message { at, name, text }),
            Self::Error { message } => Err(message),
        }
    }
}

/// Result of a successful establishment.
pub struct Established {
    pub handle: Arc<dyn RemoteSession>,
    /// Host the session is connected to.
    pub hostname: String,
    /// Participants present at login.
    pub roster: Vec<String>,
    /// Negotiated session timeout; the session is refreshed at half of it.
    pub session_timeout: Duration,
    /// Server push events for this session.
    pub pushes: mpsc::UnboundedReceiver<PushEvent>,
}

/// Performs the authentication handshake.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Fails with `Auth` or `Connect`; the caller applies its own deadline.
    async fn establish(&self, credentials: &Credentials) -> Result<Established, SessionError>;
}
