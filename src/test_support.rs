//! Shared fakes for unit tests: a recording observer, a scripted remote
//! session and a scripted authenticator.

use crate::errors::SessionError;
use crate::observer::{ChatEvent, SessionObserver};
use crate::remote::{Authenticator, Credentials, Established, PushEvent, RemoteSession};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One callback as seen by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Init(Vec<String>),
    Event(ChatEvent),
    Error(String),
    Inactivity,
}

/// Observer that records every callback and optionally forwards it.
#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Seen>>,
    forward: Option<mpsc::UnboundedSender<Seen>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Observer that also forwards each callback to the returned receiver.
    pub fn forwarding() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Self {
            seen: Mutex::new(Vec::new()),
            forward: Some(tx),
        };
        (Arc::new(observer), rx)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn record(&self, seen: Seen) {
        if let Some(tx) = &self.forward {
            let _ = tx.send(seen.clone());
        }
        self.seen.lock().push(seen);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_init(&self, roster: &[String]) {
        self.record(Seen::Init(roster.to_vec()));
    }

    fn on_event(&self, event: &ChatEvent) {
        self.record(Seen::Event(event.clone()));
    }

    fn on_error(&self, message: &str) {
        self.record(Seen::Error(message.to_string()));
    }

    fn on_inactivity(&self) {
        self.record(Seen::Inactivity);
    }
}

/// Fixed timestamp offset by `seconds`, so test events are distinguishable.
pub fn at(seconds: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds as i64)
}

pub fn message(n: u32) -> ChatEvent {
    ChatEvent::Message {
        at: at(n),
        name: "alice".to_string(),
        text: format!("e{}", n),
    }
}

pub fn join(n: u32, name: &str) -> ChatEvent {
    ChatEvent::Join {
        at: at(n),
        name: name.to_string(),
    }
}

pub fn leave(n: u32, name: &str) -> ChatEvent {
    ChatEvent::Leave {
        at: at(n),
        name: name.to_string(),
    }
}

/// Remote session whose calls are counted and whose failures are scripted.
#[derive(Default)]
pub struct FakeRemote {
    pub pings: AtomicUsize,
    pub sends: Mutex<Vec<String>>,
    pub destroys: AtomicUsize,
    pub fail_ping: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_destroy: AtomicBool,
    /// Sends completed when the session was released.
    pub sends_at_release: Mutex<Option<usize>>,
    /// Delay applied to each send, in milliseconds.
    pub send_delay_ms: AtomicU64,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }
}

#[async_trait]
impl RemoteSession for FakeRemote {
    async fn ping(&self) -> anyhow::Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping.load(Ordering::SeqCst) {
            anyhow::bail!("ping refused");
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("send refused");
        }
        self.sends.lock().push(text.to_string());
        Ok(())
    }

    async fn destroy_session(&self) -> anyhow::Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        *self.sends_at_release.lock() = Some(self.send_count());
        if self.fail_destroy.load(Ordering::SeqCst) {
            anyhow::bail!("already gone");
        }
        Ok(())
    }
}

/// Authenticator accepting a single user/password pair.
///
/// Every successful establishment hands out `remote` and keeps the push
/// sender so tests can inject server events.
pub struct FakeAuthenticator {
    pub remote: Arc<FakeRemote>,
    pub user: String,
    pub password: String,
    pub roster: Vec<String>,
    pub session_timeout: Duration,
    pub delay: Option<Duration>,
    pub connect_error: Option<String>,
    pub attempts: AtomicUsize,
    pushes: Mutex<Option<mpsc::UnboundedSender<PushEvent>>>,
}

impl FakeAuthenticator {
    pub fn new(remote: Arc<FakeRemote>) -> Self {
        Self {
            remote,
            user: "userid".to_string(),
            password: "secret".to_string(),
            roster: vec!["bob".to_string()],
            session_timeout: Duration::from_secs(60),
            delay: None,
            connect_error: None,
            attempts: AtomicUsize::new(0),
            pushes: Mutex::new(None),
        }
    }

    /// Sender for the push channel of the latest established session.
    pub fn pusher(&self) -> mpsc::UnboundedSender<PushEvent> {
        self.pushes
            .lock()
            .clone()
            .expect("no session established yet")
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn establish(&self, credentials: &Credentials) -> Result<Established, SessionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.connect_error {
            return Err(SessionError::Connect {
                message: message.clone(),
            });
        }
        if credentials.user != self.user || credentials.password != self.password {
            return Err(SessionError::Auth {
                message: format!("unknown user or wrong password for {}", credentials.user),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.pushes.lock() = Some(tx);
        let mut roster = self.roster.clone();
        roster.push(credentials.user.clone());

        Ok(Established {
            handle: self.remote.clone(),
            hostname: "chat.test".to_string(),
            roster,
            session_timeout: self.session_timeout,
            pushes: rx,
        })
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("userid", "secret")
}
