//! Serialized execution context for observer callbacks.
//!
//! Every callback delivered to a [`SessionObserver`](crate::observer::SessionObserver)
//! goes through an [`Executor`]. Implementations must run jobs one at a time,
//! in submission order.

use crate::session_log::session_log;
use tokio::sync::mpsc;

/// A unit of work queued onto the serialized context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-consumer delivery mechanism.
///
/// `submit` may be called from any thread, including while the session
/// manager's lock is held, so it must never block on the jobs themselves.
pub trait Executor: Send + Sync {
    fn submit(&self, job: Job);
}

/// Executor backed by a Tokio task draining an unbounded queue.
///
/// Jobs submitted after the consumer task has stopped are dropped.
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
    _task: tokio::task::JoinHandle<()>,
}

impl SerialExecutor {
    /// Spawns the consumer task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            session_log("executor", "Delivery queue closed");
        });
        Self { tx, _task: task }
    }
}

impl Executor for SerialExecutor {
    fn submit(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("Delivery queue closed, dropping job");
        }
    }
}

/// Executor that runs each job inline on the submitting thread.
///
/// Deterministic, which makes it the executor of choice in unit tests.
/// Jobs run while the session manager's lock is held, so observers used with
/// it must not call back into the manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn submit(&self, job: Job) {
        job();
    }
}
