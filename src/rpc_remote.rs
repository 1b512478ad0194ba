//! tarpc-backed [`Authenticator`] and [`RemoteSession`].
//!
//! Login goes over the chat service connection. The client then connects to
//! the server's subscriber port and runs a `ChatCallback` server on that
//! connection; the chat server calls into it to push room events.

use crate::errors::SessionError;
use crate::remote::{Authenticator, Credentials, Established, PushEvent, RemoteSession};
use crate::rpc::chat_service::{ChatCallback, ChatServiceClient};
use crate::rpc::ChatError;
use crate::session_log::session_log;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tarpc::serde_transport::tcp;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::{client, context};
use tokio::sync::mpsc;

/// Default deadline for each TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards server pushes into the session's push channel.
#[derive(Clone)]
struct PushForwarder {
    session_id: String,
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl ChatCallback for PushForwarder {
    async fn session_id(self, _: context::Context) -> String {
        self.session_id
    }

    async fn joined(self, _: context::Context, at: DateTime<Utc>, name: String) {
        let _ = self.tx.send(PushEvent::Join { at, name });
    }

    async fn left(self, _: context::Context, at: DateTime<Utc>, name: String) {
        let _ = self.tx.send(PushEvent::Leave { at, name });
    }

    async fn message(self, _: context::Context, at: DateTime<Utc>, name: String, text: String) {
        let _ = self.tx.send(PushEvent::Message { at, name, text });
    }

    async fn error(self, _: context::Context, message: String) {
        session_log("rpc_remote", &format!("Server error push: {}", message));
        let _ = self.tx.send(PushEvent::Error { message });
    }

    async fn ping(self, _: context::Context) -> bool {
        true
    }
}

/// Logs in to a chat server over tarpc.
#[derive(Debug, Clone)]
pub struct RpcAuthenticator {
    address: String,
    connect_timeout: Duration,
}

impl RpcAuthenticator {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Address of the subscriber port on the same host as the service.
    fn subscriber_address(&self, port: u16) -> String {
        match self.address.rsplit_once(':') {
            Some((host, _)) => format!("{}:{}", host, port),
            None => format!("{}:{}", self.address, port),
        }
    }

    /// Maps the outcome of a deadline-bounded connect.
    fn connected<T>(
        &self,
        address: &str,
        outcome: Result<std::io::Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T, SessionError> {
        match outcome {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(SessionError::Connect {
                message: format!("{}: {}", address, e),
            }),
            Err(_) => Err(SessionError::Timeout {
                after: self.connect_timeout,
            }),
        }
    }
}

#[async_trait]
impl Authenticator for RpcAuthenticator {
    async fn establish(&self, credentials: &Credentials) -> Result<Established, SessionError> {
        let outcome = tokio::time::timeout(
            self.connect_timeout,
            tcp::connect(&self.address, Bincode::default),
        )
        .await;
        let transport = self.connected(&self.address, outcome)?;
        let client = ChatServiceClient::new(client::Config::default(), transport).spawn();

        let reply = client
            .login(
                context::current(),
                credentials.user.clone(),
                credentials.password.clone(),
            )
            .await
            .map_err(|e| SessionError::Connect {
                message: e.to_string(),
            })?
            .map_err(|e| match e {
                ChatError::AuthenticationFailed => SessionError::Auth {
                    message: e.to_string(),
                },
                other => SessionError::Connect {
                    message: other.to_string(),
                },
            })?;

        let subscriber_addr = self.subscriber_address(reply.subscriber_port);
        let outcome = tokio::time::timeout(
            self.connect_timeout,
            tcp::connect(&subscriber_addr, Bincode::default),
        )
        .await;
        let sub_transport = match self.connected(&subscriber_addr, outcome) {
            Ok(t) => t,
            Err(e) => {
                let _ = client
                    .logout(context::current(), reply.session_id.clone())
                    .await;
                return Err(e);
            }
        };

        let (tx, pushes) = mpsc::unbounded_channel();
        let forwarder = PushForwarder {
            session_id: reply.session_id.clone(),
            tx,
        };

        // Pushes are handled one at a time so they reach the channel in the
        // order the server sent them.
        let callback_task = tokio::spawn(async move {
            server::BaseChannel::with_defaults(sub_transport)
                .execute(forwarder.serve())
                .for_each(|response| response)
                .await;
            session_log("rpc_remote", "Callback server ended");
        });

        session_log(
            "rpc_remote",
            &format!(
                "Logged in to {} as {} (session {})",
                reply.hostname, credentials.user, reply.session_id
            ),
        );

        Ok(Established {
            handle: Arc::new(RpcRemoteSession {
                client,
                session_id: reply.session_id,
                callback_task,
            }),
            hostname: reply.hostname,
            roster: reply.roster,
            session_timeout: Duration::from_secs(reply.session_timeout_secs),
            pushes,
        })
    }
}

/// A logged-in chat service session.
pub struct RpcRemoteSession {
    client: ChatServiceClient,
    session_id: String,
    callback_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl RemoteSession for RpcRemoteSession {
    async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .ping(context::current(), self.session_id.clone())
            .await??;
        Ok(())
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.client
            .send(context::current(), self.session_id.clone(), text.to_string())
            .await??;
        Ok(())
    }

    async fn destroy_session(&self) -> anyhow::Result<()> {
        self.client
            .logout(context::current(), self.session_id.clone())
            .await??;
        Ok(())
    }
}

impl Drop for RpcRemoteSession {
    fn drop(&mut self) {
        self.callback_task.abort();
    }
}
