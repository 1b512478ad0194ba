//! Client-side session manager.
//!
//! Owns the single remote chat session, its replay log and attached
//! observers. Four contexts touch the shared state: the caller, the Tokio
//! tasks doing establishment and handle release, the refresh scheduler, and
//! the push pump delivering server events. All of it sits behind one lock;
//! observer callbacks run on the [`Executor`].
//!
//! Every failure path ends in [`SessionManager::destroy`], which is
//! idempotent: the first call tears down, later calls do nothing.

use crate::config::SessionConfig;
use crate::errors::{DestroyReason, SessionError};
use crate::executor::Executor;
use crate::fanout::Fanout;
use crate::observer::{ChatEvent, ObserverId, SessionObserver};
use crate::refresh::{self, tick_action, TickAction};
use crate::remote::{Authenticator, Credentials, Established, PushEvent, RemoteSession};
use crate::session_log::session_log;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where the manager is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session was ever established.
    Idle,
    Establishing,
    Active,
    /// The last session was torn down. Terminal until a new `establish`.
    Destroyed,
}

/// Descriptor returned by a successful establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub hostname: String,
    pub refresh_interval: Duration,
}

/// Returned by [`SessionManager::attach_observer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: ObserverId,
    pub hostname: String,
}

struct SessionState {
    generation: u64,
    hostname: String,
    refresh_interval: Duration,
    last_activity: Instant,
    destroyed: bool,
    termination: Option<DestroyReason>,
    handle: Option<Arc<dyn RemoteSession>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Drains queued sends; not aborted on destroy.
    outbound_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

struct ManagerState {
    session: Option<SessionState>,
    establishing: bool,
    fanout: Fanout,
    next_generation: u64,
}

pub(crate) struct SessionInner {
    state: Mutex<ManagerState>,
    executor: Arc<dyn Executor>,
    authenticator: Arc<dyn Authenticator>,
    config: SessionConfig,
    runtime: tokio::runtime::Handle,
}

/// Manages one remote chat session at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Creates a manager bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: SessionConfig,
        authenticator: Arc<dyn Authenticator>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let fanout = Fanout::new(config.replay_capacity);
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(ManagerState {
                    session: None,
                    establishing: false,
                    fanout,
                    next_generation: 0,
                }),
                executor,
                authenticator,
                config,
                runtime: tokio::runtime::Handle::current(),
            }),
        }
    }

    /// Authenticates and activates a new session.
    ///
    /// Rejected with `AlreadyActive` while a session is live or another
    /// establishment is running. Failures leave the manager without a new
    /// session and are never delivered to observers.
    pub async fn establish(&self, credentials: &Credentials) -> Result<SessionInfo, SessionError> {
        {
            let mut state = self.inner.state.lock();
            let live = state.session.as_ref().is_some_and(|s| !s.destroyed);
            if state.establishing || live {
                return Err(SessionError::AlreadyActive);
            }
            state.establishing = true;
        }
        let guard = EstablishGuard {
            inner: &self.inner,
            armed: true,
        };

        session_log(
            "session",
            &format!("Establishing session for {}", credentials.user),
        );

        let deadline = self.inner.config.establish_timeout();
        let result =
            match tokio::time::timeout(deadline, self.inner.authenticator.establish(credentials))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout { after: deadline }),
            };

        match result {
            Ok(established) => {
                guard.disarm();
                let info = self.inner.activate(established);
                session_log(
                    "session",
                    &format!(
                        "Session active on {} (refresh every {:?})",
                        info.hostname, info.refresh_interval
                    ),
                );
                Ok(info)
            }
            Err(e) => {
                session_log("session", &format!("Establishment failed: {}", e));
                Err(e)
            }
        }
    }

    /// Attaches an observer to the current session.
    ///
    /// With `replay`, the observer first receives `on_init` with the roster
    /// and the whole replay log, then every event recorded afterwards. If the
    /// session already ended with an error, `on_error` follows the replay.
    pub fn attach_observer(
        &self,
        observer: Arc<dyn SessionObserver>,
        replay: bool,
    ) -> Result<Attachment, SessionError> {
        let mut state = self.inner.state.lock();
        let ManagerState {
            session, fanout, ..
        } = &mut *state;
        let session = session.as_ref().ok_or(SessionError::NoSession)?;

        let id = fanout.attach(
            observer,
            replay,
            session.termination.as_ref(),
            self.inner.executor.as_ref(),
        );
        Ok(Attachment {
            id,
            hostname: session.hostname.clone(),
        })
    }

    /// Detaches an observer. Returns false if it was not attached.
    pub fn detach_observer(&self, id: ObserverId) -> bool {
        self.inner.state.lock().fanout.detach(id)
    }

    /// Queues a chat message for the remote side.
    ///
    /// Does nothing once the session is destroyed. Sends go out in issue
    /// order; a failed send destroys the session with the failure as reason.
    /// Messages issued before a destroy still go out, ahead of the remote
    /// release. Returns whether the message was issued.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        let mut state = self.inner.state.lock();
        let Some(session) = state.session.as_mut().filter(|s| !s.destroyed) else {
            return false;
        };
        let issued = match &session.outbound {
            Some(outbound) => outbound.send(payload.into()).is_ok(),
            None => false,
        };
        if issued {
            session.last_activity = Instant::now();
        }
        issued
    }

    /// Tears the session down. Only the first call has an effect and
    /// returns true.
    pub fn destroy(&self, reason: DestroyReason) -> bool {
        self.inner.destroy_matching(None, reason)
    }

    /// Silent teardown: observers are not notified.
    pub fn logout(&self) -> bool {
        self.destroy(DestroyReason::Logout)
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.inner.state.lock();
        match &state.session {
            _ if state.establishing => SessionPhase::Establishing,
            Some(session) if session.destroyed => SessionPhase::Destroyed,
            Some(_) => SessionPhase::Active,
            None => SessionPhase::Idle,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.destroyed)
    }

    pub fn hostname(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|s| s.hostname.clone())
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|s| s.refresh_interval)
    }

    /// Why the session ended, once it has.
    pub fn termination(&self) -> Option<DestroyReason> {
        let state = self.inner.state.lock();
        state.session.as_ref().and_then(|s| s.termination.clone())
    }

    pub fn roster(&self) -> Vec<String> {
        self.inner.state.lock().fanout.roster().snapshot()
    }

    pub fn replay_log(&self) -> Vec<ChatEvent> {
        self.inner.state.lock().fanout.log().snapshot()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().fanout.observer_count()
    }
}

/// Clears the establishing flag if `establish` fails or is cancelled.
struct EstablishGuard<'a> {
    inner: &'a SessionInner,
    armed: bool,
}

impl EstablishGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for EstablishGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().establishing = false;
        }
    }
}

impl SessionInner {
    fn activate(self: &Arc<Self>, established: Established) -> SessionInfo {
        let Established {
            handle,
            hostname,
            roster,
            session_timeout,
            pushes,
        } = established;
        let refresh_interval = refresh::refresh_interval(session_timeout);

        let mut state = self.state.lock();
        state.establishing = false;
        let generation = state.next_generation;
        state.next_generation += 1;
        state.fanout.reset(roster);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(self);
        let tasks = vec![
            refresh::spawn(&self.runtime, weak.clone(), generation, refresh_interval),
            spawn_push_pump(&self.runtime, weak.clone(), generation, pushes),
        ];
        let outbound_task = spawn_outbound_worker(
            &self.runtime,
            weak,
            generation,
            handle.clone(),
            outbound_rx,
        );

        state.session = Some(SessionState {
            generation,
            hostname: hostname.clone(),
            refresh_interval,
            last_activity: Instant::now(),
            destroyed: false,
            termination: None,
            handle: Some(handle),
            outbound: Some(outbound_tx),
            outbound_task: Some(outbound_task),
            tasks,
        });

        SessionInfo {
            hostname,
            refresh_interval,
        }
    }

    /// Records a pushed event if `generation` is still the live session.
    fn record_for(&self, generation: u64, event: ChatEvent) -> bool {
        let mut state = self.state.lock();
        let live = state
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation && !s.destroyed);
        if live {
            state
                .fanout
                .record_and_dispatch(event, self.executor.as_ref());
        }
        live
    }

    /// Inspects session `generation` for the refresh scheduler.
    pub(crate) fn refresh_check(
        &self,
        generation: u64,
    ) -> (TickAction, Option<Arc<dyn RemoteSession>>) {
        let state = self.state.lock();
        match state.session.as_ref() {
            Some(session) if session.generation == generation => {
                let action = tick_action(
                    session.destroyed,
                    session.last_activity.elapsed(),
                    self.config.inactivity_threshold(),
                );
                (action, session.handle.clone())
            }
            _ => (TickAction::Stop, None),
        }
    }

    /// Destroys session `generation`; stale background tasks of an older
    /// session cannot tear down a newer one.
    pub(crate) fn destroy_generation(&self, generation: u64, reason: DestroyReason) -> bool {
        self.destroy_matching(Some(generation), reason)
    }

    fn destroy_matching(&self, generation: Option<u64>, reason: DestroyReason) -> bool {
        let (handle, outbound_task) = {
            let mut state = self.state.lock();
            let ManagerState {
                session, fanout, ..
            } = &mut *state;
            let Some(session) = session.as_mut() else {
                return false;
            };
            if session.destroyed || generation.is_some_and(|g| g != session.generation) {
                return false;
            }

            session.destroyed = true;
            session.termination = Some(reason.clone());
            // Closing the channel lets the worker finish what was issued.
            session.outbound = None;
            for task in session.tasks.drain(..) {
                task.abort();
            }
            fanout.notify_terminal(&reason, self.executor.as_ref());
            (session.handle.take(), session.outbound_task.take())
        };

        session_log("session", &format!("Session destroyed ({})", reason));

        if let Some(handle) = handle {
            self.runtime.spawn(async move {
                if let Some(worker) = outbound_task {
                    let _ = worker.await;
                }
                if let Err(e) = handle.destroy_session().await {
                    tracing::warn!("Ignoring failed session release: {}", e);
                    session_log("session", &format!("Release failed (ignored): {}", e));
                }
            });
        }
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().session.as_mut() {
            for task in session.tasks.drain(..).chain(session.outbound_task.take()) {
                task.abort();
            }
        }
    }
}

fn spawn_push_pump(
    runtime: &tokio::runtime::Handle,
    weak: Weak<SessionInner>,
    generation: u64,
    mut pushes: mpsc::UnboundedReceiver<PushEvent>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        while let Some(push) = pushes.recv().await {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match push.into_chat_event() {
                Ok(event) => {
                    if !inner.record_for(generation, event) {
                        return;
                    }
                }
                Err(message) => {
                    session_log("session", &format!("Remote reported error: {}", message));
                    inner.destroy_generation(generation, DestroyReason::Error(message));
                    return;
                }
            }
        }

        if let Some(inner) = weak.upgrade() {
            inner.destroy_generation(
                generation,
                DestroyReason::Error("push channel closed".to_string()),
            );
        }
    })
}

fn spawn_outbound_worker(
    runtime: &tokio::runtime::Handle,
    weak: Weak<SessionInner>,
    generation: u64,
    handle: Arc<dyn RemoteSession>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = handle.send(&text).await {
                session_log("session", &format!("Send failed: {}", e));
                if let Some(inner) = weak.upgrade() {
                    inner.destroy_generation(generation, DestroyReason::Error(e.to_string()));
                }
                break;
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
