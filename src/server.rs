//! Demo chat server.
//!
//! Implements the tarpc `ChatService` and pushes room events to each
//! logged-in client through its `ChatCallback` subscriber connection.

use crate::config::ServerConfig;
use crate::rpc::chat_service::{ChatCallbackClient, ChatService};
use crate::rpc::{ChatError, ChatResult, LoginReply};
use crate::session_log::session_log;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tarpc::serde_transport::tcp;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;

/// Interval between subscriber liveness pings.
const SUBSCRIBER_PING_INTERVAL: Duration = Duration::from_secs(30);

struct ChatSessionRecord {
    user: String,
    last_seen: Instant,
}

/// Sessions and accounts of a running server.
pub struct ChatState {
    sessions: HashMap<String, ChatSessionRecord>,
    accounts: HashMap<String, String>,
    session_timeout: Duration,
}

impl ChatState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            accounts: config.accounts.clone(),
            session_timeout: config.session_timeout(),
        }
    }

    fn roster(&self) -> Vec<String> {
        let users: BTreeSet<&String> = self.sessions.values().map(|s| &s.user).collect();
        users.into_iter().cloned().collect()
    }

    fn touch(&mut self, session_id: &str) -> ChatResult<String> {
        match self.sessions.get_mut(session_id) {
            Some(record) => {
                record.last_seen = Instant::now();
                Ok(record.user.clone())
            }
            None => Err(ChatError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Removes sessions not pinged within the session timeout.
    fn expire(&mut self) -> Vec<(String, String)> {
        let timeout = self.session_timeout;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, record)| record.last_seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                let record = self.sessions.remove(&id)?;
                Some((id, record.user))
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Room event fanned out to subscribers.
#[derive(Debug, Clone)]
enum RoomEvent {
    Joined {
        at: DateTime<Utc>,
        name: String,
    },
    Left {
        at: DateTime<Utc>,
        name: String,
    },
    Message {
        at: DateTime<Utc>,
        name: String,
        text: String,
    },
}

/// Callback clients of connected subscribers, keyed by session id.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<String, ChatCallbackClient>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the subscriber for `session_id`, replacing any earlier one.
    pub fn add(&mut self, session_id: String, client: ChatCallbackClient) {
        self.subscribers.insert(session_id, client);
    }

    pub fn remove(&mut self, session_id: &str) -> Option<ChatCallbackClient> {
        self.subscribers.remove(session_id)
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Delivers `event` to every subscriber.
    /// Returns the session ids of failed subscribers for cleanup.
    async fn broadcast(&self, event: &RoomEvent) -> Vec<String> {
        let mut failed = Vec::new();

        for (session_id, client) in &self.subscribers {
            let ctx = tarpc::context::current();
            let result = match event.clone() {
                RoomEvent::Joined { at, name } => client.joined(ctx, at, name).await,
                RoomEvent::Left { at, name } => client.left(ctx, at, name).await,
                RoomEvent::Message { at, name, text } => {
                    client.message(ctx, at, name, text).await
                }
            };
            if result.is_err() {
                failed.push(session_id.clone());
            }
        }

        failed
    }

    /// Ping all subscribers. Returns the session ids of those that failed.
    async fn ping_all(&self) -> Vec<String> {
        let mut failed = Vec::new();

        for (session_id, client) in &self.subscribers {
            match client.ping(tarpc::context::current()).await {
                Ok(true) => {}
                _ => failed.push(session_id.clone()),
            }
        }

        failed
    }
}

/// Broadcasts `event` and drops subscribers that could not take it.
async fn notify_subscribers(subscribers: &RwLock<SubscriberRegistry>, event: RoomEvent) {
    let failed = {
        let registry = subscribers.read().await;
        registry.broadcast(&event).await
    };

    if !failed.is_empty() {
        let mut registry = subscribers.write().await;
        for session_id in failed {
            registry.remove(&session_id);
            session_log(
                "server",
                &format!("Removed dead subscriber: {}", session_id),
            );
        }
    }
}

/// Server implementation for ChatService, one clone per connection.
#[derive(Clone)]
pub struct ChatServer {
    state: Arc<Mutex<ChatState>>,
    subscribers: Arc<RwLock<SubscriberRegistry>>,
    hostname: String,
    subscriber_port: u16,
}

impl ChatServer {
    pub fn new(
        state: Arc<Mutex<ChatState>>,
        subscribers: Arc<RwLock<SubscriberRegistry>>,
        subscriber_port: u16,
    ) -> Self {
        Self {
            state,
            subscribers,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            subscriber_port,
        }
    }
}

impl ChatService for ChatServer {
    async fn login(
        self,
        _: tarpc::context::Context,
        user: String,
        password: String,
    ) -> ChatResult<LoginReply> {
        let (session_id, roster, session_timeout) = {
            let mut state = self.state.lock().await;
            if state.accounts.get(&user) != Some(&password) {
                session_log("server", &format!("Login rejected for {}", user));
                return Err(ChatError::AuthenticationFailed);
            }

            let session_id = uuid::Uuid::new_v4().to_string();
            state.sessions.insert(
                session_id.clone(),
                ChatSessionRecord {
                    user: user.clone(),
                    last_seen: Instant::now(),
                },
            );
            (session_id, state.roster(), state.session_timeout)
        };

        session_log(
            "server",
            &format!("{} logged in (session {})", user, session_id),
        );
        notify_subscribers(
            &self.subscribers,
            RoomEvent::Joined {
                at: Utc::now(),
                name: user,
            },
        )
        .await;

        Ok(LoginReply {
            session_id,
            hostname: self.hostname.clone(),
            roster,
            session_timeout_secs: session_timeout.as_secs(),
            subscriber_port: self.subscriber_port,
        })
    }

    async fn ping(self, _: tarpc::context::Context, session_id: String) -> ChatResult<()> {
        self.state.lock().await.touch(&session_id).map(|_| ())
    }

    async fn send(
        self,
        _: tarpc::context::Context,
        session_id: String,
        text: String,
    ) -> ChatResult<()> {
        let user = self.state.lock().await.touch(&session_id)?;
        notify_subscribers(
            &self.subscribers,
            RoomEvent::Message {
                at: Utc::now(),
                name: user,
                text,
            },
        )
        .await;
        Ok(())
    }

    async fn logout(self, _: tarpc::context::Context, session_id: String) -> ChatResult<()> {
        let record = self.state.lock().await.sessions.remove(&session_id);
        let Some(record) = record else {
            return Err(ChatError::SessionNotFound { session_id });
        };

        self.subscribers.write().await.remove(&session_id);
        session_log(
            "server",
            &format!("{} logged out (session {})", record.user, session_id),
        );
        notify_subscribers(
            &self.subscribers,
            RoomEvent::Left {
                at: Utc::now(),
                name: record.user,
            },
        )
        .await;
        Ok(())
    }
}

/// A running server. Dropping the handle does not stop it; call `shutdown`.
pub struct ChatServerHandle {
    pub address: SocketAddr,
    pub subscriber_port: u16,
    pub state: Arc<Mutex<ChatState>>,
    pub subscribers: Arc<RwLock<SubscriberRegistry>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ChatServerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Binds the service and subscriber ports and spawns the server tasks.
///
/// Port 0 in `config.address` or `config.subscriber_port` picks a free port;
/// the handle reports the bound ones.
pub async fn start_chat_server(config: &ServerConfig) -> anyhow::Result<ChatServerHandle> {
    use anyhow::Context;

    let state = Arc::new(Mutex::new(ChatState::new(config)));
    let subscribers = Arc::new(RwLock::new(SubscriberRegistry::new()));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let listener = tcp::listen(&config.address, Bincode::default)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    let address = listener.local_addr();

    let subscriber_addr = SocketAddr::new(address.ip(), config.subscriber_port);
    let subscriber_listener = tcp::listen(subscriber_addr, Bincode::default)
        .await
        .with_context(|| format!("Failed to bind subscriber port {}", subscriber_addr))?;
    let subscriber_port = subscriber_listener.local_addr().port();

    session_log(
        "server",
        &format!(
            "Chat server listening on {} (subscribers on {})",
            address, subscriber_port
        ),
    );

    let server = ChatServer::new(state.clone(), subscribers.clone(), subscriber_port);
    let shutdown_tx_conn = shutdown_tx.clone();
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut listener = listener;
        loop {
            tokio::select! {
                Some(result) = listener.next() => {
                    match result {
                        Ok(transport) => {
                            let server = server.clone();
                            let channel = server::BaseChannel::with_defaults(transport);
                            let mut conn_shutdown = shutdown_tx_conn.subscribe();
                            tokio::spawn(async move {
                                let serve = channel.execute(server.serve()).for_each(|response| async {
                                    tokio::spawn(response);
                                });
                                tokio::select! {
                                    _ = serve => {}
                                    _ = conn_shutdown.recv() => {}
                                }
                            });
                        }
                        Err(e) => {
                            session_log("server", &format!("Accept error: {}", e));
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });

    let sub_state = state.clone();
    let sub_subscribers = subscribers.clone();
    let mut sub_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut listener = subscriber_listener;
        loop {
            tokio::select! {
                Some(result) = listener.next() => {
                    match result {
                        Ok(transport) => {
                            let client = ChatCallbackClient::new(
                                tarpc::client::Config::default(),
                                transport,
                            ).spawn();
                            tokio::spawn(register_subscriber(
                                client,
                                sub_state.clone(),
                                sub_subscribers.clone(),
                            ));
                        }
                        Err(e) => {
                            session_log("server", &format!("Subscriber accept error: {}", e));
                        }
                    }
                }
                _ = sub_shutdown.recv() => {
                    break;
                }
            }
        }
        // Dropping the callback clients closes the subscriber connections.
        sub_subscribers.write().await.clear();
    });

    tokio::spawn(run_session_reaper(
        state.clone(),
        subscribers.clone(),
        shutdown_tx.clone(),
    ));

    Ok(ChatServerHandle {
        address,
        subscriber_port,
        state,
        subscribers,
        shutdown_tx,
    })
}

/// Asks a new subscriber which session it belongs to and registers it.
async fn register_subscriber(
    client: ChatCallbackClient,
    state: Arc<Mutex<ChatState>>,
    subscribers: Arc<RwLock<SubscriberRegistry>>,
) {
    let session_id = match client.session_id(tarpc::context::current()).await {
        Ok(id) => id,
        Err(e) => {
            session_log("server", &format!("Subscriber handshake failed: {}", e));
            return;
        }
    };

    if !state.lock().await.sessions.contains_key(&session_id) {
        session_log(
            "server",
            &format!("Rejected subscriber for unknown session {}", session_id),
        );
        let _ = client
            .error(
                tarpc::context::current(),
                format!("Session not found: {}", session_id),
            )
            .await;
        return;
    }

    subscribers.write().await.add(session_id.clone(), client);
    session_log(
        "server",
        &format!("Subscriber connected for session {}", session_id),
    );
}

/// Drops push connections that no longer answer a ping.
async fn prune_silent_subscribers(subscribers: &RwLock<SubscriberRegistry>) {
    let silent = subscribers.read().await.ping_all().await;
    if silent.is_empty() {
        return;
    }

    let mut registry = subscribers.write().await;
    for session_id in &silent {
        registry.remove(session_id);
    }
    session_log(
        "server",
        &format!(
            "Dropped {} silent push connections, {} sessions still subscribed",
            silent.len(),
            registry.count()
        ),
    );
}

/// Expires sessions that stopped pinging and tells their owners. Also
/// sweeps push connections that went silent.
pub async fn run_session_reaper(
    state: Arc<Mutex<ChatState>>,
    subscribers: Arc<RwLock<SubscriberRegistry>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let period = {
        let state = state.lock().await;
        (state.session_timeout / 4).max(Duration::from_secs(1))
    };
    let mut interval = tokio::time::interval(period);
    let mut sweep = tokio::time::interval(SUBSCRIBER_PING_INTERVAL);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                prune_silent_subscribers(&subscribers).await;
            }
            _ = interval.tick() => {
                let expired = state.lock().await.expire();
                for (session_id, user) in expired {
                    session_log(
                        "server",
                        &format!("Session {} of {} expired", session_id, user),
                    );
                    let client = subscribers.write().await.remove(&session_id);
                    if let Some(client) = client {
                        let _ = client
                            .error(tarpc::context::current(), "Session expired".to_string())
                            .await;
                    }
                    notify_subscribers(
                        &subscribers,
                        RoomEvent::Left { at: Utc::now(), name: user },
                    )
                    .await;
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(accounts: &[(&str, &str)]) -> ServerConfig {
        ServerConfig {
            accounts: accounts
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            ..ServerConfig::default()
        }
    }

    fn insert(state: &mut ChatState, id: &str, user: &str) {
        state.sessions.insert(
            id.to_string(),
            ChatSessionRecord {
                user: user.to_string(),
                last_seen: Instant::now(),
            },
        );
    }

    #[test]
    fn test_roster_is_sorted_and_deduplicated() {
        let mut state = ChatState::new(&config_with(&[]));
        insert(&mut state, "s1", "carol");
        insert(&mut state, "s2", "alice");
        insert(&mut state, "s3", "carol");

        assert_eq!(state.roster(), vec!["alice", "carol"]);
    }

    #[test]
    fn test_touch_unknown_session() {
        let mut state = ChatState::new(&config_with(&[]));
        assert_eq!(
            state.touch("missing"),
            Err(ChatError::SessionNotFound {
                session_id: "missing".to_string()
            })
        );
        insert(&mut state, "s1", "alice");
        assert_eq!(state.touch("s1"), Ok("alice".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_removes_only_stale_sessions() {
        let mut state = ChatState::new(&config_with(&[]));
        insert(&mut state, "old", "alice");
        tokio::time::advance(Duration::from_secs(45)).await;
        insert(&mut state, "new", "bob");
        tokio::time::advance(Duration::from_secs(20)).await;

        let expired = state.expire();

        assert_eq!(expired, vec![("old".to_string(), "alice".to_string())]);
        assert_eq!(state.session_count(), 1);
        assert_eq!(state.roster(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_silent_subscribers_are_pruned() {
        let (client_side, server_side) = tarpc::transport::channel::unbounded();
        drop(server_side);
        let client = ChatCallbackClient::new(tarpc::client::Config::default(), client_side).spawn();

        let subscribers = RwLock::new(SubscriberRegistry::new());
        subscribers.write().await.add("gone".to_string(), client);
        prune_silent_subscribers(&subscribers).await;

        assert_eq!(subscribers.read().await.count(), 0);
    }
}
