//! Replay log, roster and ordered observer fan-out.
//!
//! [`Fanout`] lives inside the session manager's single lock. Every mutation
//! submits its observer callbacks to the executor before the lock is
//! released, so the executor's FIFO order matches the order in which events
//! were recorded and observers were attached.

use crate::errors::DestroyReason;
use crate::executor::Executor;
use crate::observer::{ChatEvent, ObserverId, SessionObserver};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Number of events retained for newly attached observers.
pub const DEFAULT_REPLAY_CAPACITY: usize = 200;

/// Bounded FIFO of recent chat events.
#[derive(Debug, Clone)]
pub struct ReplayLog {
    entries: VecDeque<ChatEvent>,
    capacity: usize,
}

impl ReplayLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event, returning the entry evicted to make room, if any.
    pub fn push(&mut self, event: ChatEvent) -> Option<ChatEvent> {
        if self.capacity == 0 {
            return Some(event);
        }
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(event);
        evicted
    }

    /// Oldest-first copy of the retained events.
    pub fn snapshot(&self) -> Vec<ChatEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Current set of known participants.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    names: BTreeSet<String>,
}

impl Roster {
    pub fn replace<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.names = names.into_iter().collect();
    }

    /// Applies a join or leave. Messages do not change the roster.
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Join { name, .. } => {
                self.names.insert(name.clone());
            }
            ChatEvent::Leave { name, .. } => {
                self.names.remove(name);
            }
            ChatEvent::Message { .. } => {}
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Sorted copy of the participant names.
    pub fn snapshot(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

/// An attached observer. `attached` is cleared on detach and checked by every
/// queued callback right before it runs.
struct Registration {
    id: ObserverId,
    observer: Arc<dyn SessionObserver>,
    attached: Arc<AtomicBool>,
}

impl Registration {
    fn deliver<F>(&self, executor: &dyn Executor, callback: F)
    where
        F: FnOnce(&dyn SessionObserver) + Send + 'static,
    {
        let observer = self.observer.clone();
        let attached = self.attached.clone();
        let id = self.id;
        executor.submit(Box::new(move || {
            if attached.load(Ordering::Acquire) {
                callback(observer.as_ref());
            } else {
                tracing::debug!(observer = id.0, "Dropping callback for detached observer");
            }
        }));
    }
}

/// Replay log, roster and observer registry, mutated as one unit.
pub struct Fanout {
    log: ReplayLog,
    roster: Roster,
    observers: Vec<Registration>,
    next_id: u64,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: ReplayLog::new(capacity),
            roster: Roster::default(),
            observers: Vec::new(),
            next_id: 0,
        }
    }

    /// Starts over for a new session: empty log, fresh roster, no observers.
    pub fn reset(&mut self, roster: Vec<String>) {
        self.log.clear();
        self.roster.replace(roster);
        for registration in self.observers.drain(..) {
            registration.attached.store(false, Ordering::Release);
        }
    }

    /// Appends `event` to the log and queues it for every attached observer,
    /// in attachment order.
    pub fn record_and_dispatch(&mut self, event: ChatEvent, executor: &dyn Executor) {
        self.roster.apply(&event);
        let shared = Arc::new(event.clone());
        self.log.push(event);

        for registration in &self.observers {
            let event = shared.clone();
            registration.deliver(executor, move |observer| observer.on_event(&event));
        }
    }

    /// Registers an observer.
    ///
    /// With `replay`, a single batch delivering `on_init`, the whole log and
    /// then the terminal notification (if the session already ended) is
    /// queued before this returns. Without it only the terminal notification
    /// is queued.
    pub fn attach(
        &mut self,
        observer: Arc<dyn SessionObserver>,
        replay: bool,
        terminal: Option<&DestroyReason>,
        executor: &dyn Executor,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;

        let registration = Registration {
            id,
            observer,
            attached: Arc::new(AtomicBool::new(true)),
        };

        let terminal = terminal.cloned();
        if replay {
            let roster = self.roster.snapshot();
            let entries = self.log.snapshot();
            let attached = registration.attached.clone();
            registration.deliver(executor, move |observer| {
                observer.on_init(&roster);
                for entry in &entries {
                    if !attached.load(Ordering::Acquire) {
                        return;
                    }
                    observer.on_event(entry);
                }
                if attached.load(Ordering::Acquire) {
                    if let Some(reason) = &terminal {
                        deliver_terminal(observer, reason);
                    }
                }
            });
        } else if let Some(reason) = terminal {
            registration.deliver(executor, move |observer| {
                deliver_terminal(observer, &reason)
            });
        }

        self.observers.push(registration);
        id
    }

    /// Removes an observer. Callbacks already queued for it are dropped.
    pub fn detach(&mut self, id: ObserverId) -> bool {
        match self.observers.iter().position(|r| r.id == id) {
            Some(index) => {
                let registration = self.observers.remove(index);
                registration.attached.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Queues the single terminal notification for every attached observer.
    pub fn notify_terminal(&self, reason: &DestroyReason, executor: &dyn Executor) {
        if !matches!(reason, DestroyReason::Inactivity) && reason.error_message().is_none() {
            return;
        }
        for registration in &self.observers {
            let reason = reason.clone();
            registration.deliver(executor, move |observer| {
                deliver_terminal(observer, &reason)
            });
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn log(&self) -> &ReplayLog {
        &self.log
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }
}

fn deliver_terminal(observer: &dyn SessionObserver, reason: &DestroyReason) {
    match reason {
        DestroyReason::Inactivity => observer.on_inactivity(),
        DestroyReason::Error(_) => {
            if let Some(message) = reason.error_message() {
                observer.on_error(message);
            }
        }
        DestroyReason::Logout => {}
    }
}

#[cfg(test)]
#[path = "tests/fanout_tests.rs"]
mod tests;
