//! Client-side chat session lifecycle with event replay.
//!
//! [`SessionManager`] owns one remote chat session at a time: it
//! authenticates, keeps the session alive, fans server events out to
//! attached observers (replaying recent history to late joiners) and tears
//! everything down exactly once.

pub mod config;
pub mod errors;
pub mod executor;
pub mod fanout;
pub mod observer;
pub mod paths;
pub mod refresh;
pub mod remote;
pub mod retry;
pub mod rpc;
pub mod rpc_remote;
pub mod server;
pub mod session;
pub mod session_log;

#[cfg(test)]
mod rpc_tests;
#[cfg(test)]
mod test_support;

pub use config::ChatConfig;
pub use errors::{DestroyReason, SessionError};
pub use executor::{Executor, ImmediateExecutor, SerialExecutor};
pub use observer::{ChatEvent, ObserverId, SessionObserver};
pub use remote::{Authenticator, Credentials, RemoteSession};
pub use session::{Attachment, SessionInfo, SessionManager, SessionPhase};
