//! Periodic liveness refresh for an active session.
//!
//! Each tick either stops (session gone), tears the session down for
//! inactivity, or pings the remote handle. Inactivity is only noticed at
//! tick granularity.

use crate::errors::DestroyReason;
use crate::session::SessionInner;
use crate::session_log::session_log;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Lower bound for the refresh period, so a zero server timeout cannot spin.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for the refresh period; keeps tick deadlines representable.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Refresh period for a negotiated server-side session timeout.
pub fn refresh_interval(session_timeout: Duration) -> Duration {
    (session_timeout / 2).clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL)
}

/// What a refresh tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Stop,
    Inactive,
    Ping,
}

/// Decides the action for one tick.
pub fn tick_action(destroyed: bool, idle_for: Duration, threshold: Duration) -> TickAction {
    if destroyed {
        TickAction::Stop
    } else if idle_for > threshold {
        TickAction::Inactive
    } else {
        TickAction::Ping
    }
}

/// Spawns the scheduler for session `generation`.
///
/// Holds only a weak reference, so dropping the manager ends the loop.
pub(crate) fn spawn(
    runtime: &tokio::runtime::Handle,
    weak: Weak<SessionInner>,
    generation: u64,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let handle = {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.refresh_check(generation) {
                    (TickAction::Ping, Some(handle)) => handle,
                    (TickAction::Inactive, _) => {
                        session_log("refresh", "Inactivity threshold exceeded");
                        inner.destroy_generation(generation, DestroyReason::Inactivity);
                        break;
                    }
                    _ => break,
                }
            };

            if let Err(e) = handle.ping().await {
                session_log("refresh", &format!("Ping failed: {}", e));
                if let Some(inner) = weak.upgrade() {
                    inner.destroy_generation(generation, DestroyReason::Error(e.to_string()));
                }
                break;
            }
        }
    })
}
