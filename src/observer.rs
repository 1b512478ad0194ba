//! Chat events and the observer capability set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat event retained in the replay log and fanned out to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A participant entered the chat.
    Join { at: DateTime<Utc>, name: String },
    /// A participant left the chat.
    Leave { at: DateTime<Utc>, name: String },
    /// A participant posted a message.
    Message {
        at: DateTime<Utc>,
        name: String,
        text: String,
    },
}

impl ChatEvent {
    /// When the remote side recorded the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Join { at, .. } | Self::Leave { at, .. } | Self::Message { at, .. } => *at,
        }
    }

    /// The participant the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Join { name, .. } | Self::Leave { name, .. } | Self::Message { name, .. } => {
                name
            }
        }
    }
}

impl std::fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = self.timestamp().format("%H:%M:%S");
        match self {
            Self::Join { name, .. } => write!(f, "[{}] * {} joined", time, name),
            Self::Leave { name, .. } => write!(f, "[{}] * {} left", time, name),
            Self::Message { name, text, .. } => write!(f, "[{}] <{}> {}", time, name, text),
        }
    }
}

/// Identifies one attachment of an observer to a session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

/// Local listener attached to a session manager.
///
/// Callbacks are only ever invoked on the serialized execution context, one
/// at a time. Observers receive state; they never mutate the manager from
/// inside a callback.
pub trait SessionObserver: Send + Sync {
    /// Roster snapshot delivered first when attaching with replay.
    fn on_init(&self, _roster: &[String]) {}

    fn on_event(&self, event: &ChatEvent);

    /// The session was torn down because of an error.
    fn on_error(&self, _message: &str) {}

    /// The session was torn down because the user was idle for too long.
    fn on_inactivity(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
    }

    #[test]
    fn test_chat_event_display() {
        let join = ChatEvent::Join {
            at: at(),
            name: "alice".to_string(),
        };
        assert_eq!(format!("{}", join), "[12:30:15] * alice joined");

        let message = ChatEvent::Message {
            at: at(),
            name: "bob".to_string(),
            text: "hi all".to_string(),
        };
        assert_eq!(format!("{}", message), "[12:30:15] <bob> hi all");
    }

    #[test]
    fn test_chat_event_serializes_with_kind_tag() {
        let event = ChatEvent::Leave {
            at: at(),
            name: "carol".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"leave\""));
        assert!(json.contains("carol"));
        assert_eq!(event.name(), "carol");
        assert_eq!(event.timestamp(), at());
    }
}
