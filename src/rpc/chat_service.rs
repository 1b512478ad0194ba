//! Chat service definitions for client ↔ server RPC.

use crate::rpc::{ChatResult, LoginReply};
use chrono::{DateTime, Utc};

/// Service exposed by the chat server to clients.
#[tarpc::service]
pub trait ChatService {
    /// Authenticate and open a new session.
    async fn login(user: String, password: String) -> ChatResult<LoginReply>;

    /// Keep a session alive.
    async fn ping(session_id: String) -> ChatResult<()>;

    /// Post a message to everyone logged in.
    async fn send(session_id: String, text: String) -> ChatResult<()>;

    /// Close a session.
    async fn logout(session_id: String) -> ChatResult<()>;
}

/// Callback service for push notifications (server → client).
/// Clients implement this service on their subscriber connection.
#[tarpc::service]
pub trait ChatCallback {
    /// Identifies which session this subscriber connection belongs to.
    async fn session_id() -> String;

    async fn joined(at: DateTime<Utc>, name: String);

    async fn left(at: DateTime<Utc>, name: String);

    async fn message(at: DateTime<Utc>, name: String, text: String);

    /// The server gave up on this session.
    async fn error(message: String);

    /// Ping to check if the subscriber is still alive. Returns true if healthy.
    async fn ping() -> bool;
}
