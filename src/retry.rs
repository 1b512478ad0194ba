//! Fixed-delay retry around the initial session establishment.
//!
//! The manager itself never reconnects; this is the policy a client wraps
//! around the first `establish` call.

use crate::config::RetryConfig;
use crate::errors::SessionError;
use crate::remote::Credentials;
use crate::session::{SessionInfo, SessionManager};
use crate::session_log::session_log;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Total attempts, including the first; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            delay: Duration::from_secs(config.delay_secs),
            max_attempts: config.max_attempts,
        }
    }
}

/// Establishes a session, retrying connection failures and timeouts.
///
/// Authentication failures and `AlreadyActive` are returned immediately, as
/// is the last error once the attempts are exhausted.
pub async fn establish_with_retry(
    manager: &SessionManager,
    credentials: &Credentials,
    policy: RetryPolicy,
) -> Result<SessionInfo, SessionError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match manager.establish(credentials).await {
            Ok(info) => return Ok(info),
            Err(e) if e.is_retryable() && policy.max_attempts.is_none_or(|max| attempt < max) => {
                // Log the first failure and then once a minute at the default delay
                if attempt == 1 || attempt.is_multiple_of(12) {
                    session_log(
                        "retry",
                        &format!("Establish failed (attempt {}): {}", attempt, e),
                    );
                }
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::executor::ImmediateExecutor;
    use crate::test_support::{credentials, FakeAuthenticator, FakeRemote};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn new_manager(auth: &Arc<FakeAuthenticator>) -> SessionManager {
        SessionManager::new(
            SessionConfig::default(),
            auth.clone(),
            Arc::new(ImmediateExecutor),
        )
    }

    fn policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(5),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_errors_are_retried_until_exhausted() {
        let mut auth = FakeAuthenticator::new(FakeRemote::new());
        auth.connect_error = Some("connection refused".to_string());
        let auth = Arc::new(auth);
        let started = tokio::time::Instant::now();

        let err = establish_with_retry(&new_manager(&auth), &credentials(), policy(Some(3)))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Connect { .. }));
        assert_eq!(auth.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_errors_are_not_retried() {
        let auth = Arc::new(FakeAuthenticator::new(FakeRemote::new()));

        let err = establish_with_retry(
            &new_manager(&auth),
            &Credentials::new("userid", "wrongpass"),
            policy(None),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SessionError::Auth { .. }));
        assert_eq!(auth.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_then_escalated() {
        let mut auth = FakeAuthenticator::new(FakeRemote::new());
        auth.delay = Some(Duration::from_secs(60));
        let auth = Arc::new(auth);
        let manager = new_manager(&auth);

        let err = establish_with_retry(&manager, &credentials(), policy(Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert_eq!(auth.attempts.load(Ordering::SeqCst), 2);

        let quick = Arc::new(FakeAuthenticator::new(FakeRemote::new()));
        let info = establish_with_retry(&new_manager(&quick), &credentials(), policy(None))
            .await
            .unwrap();
        assert_eq!(info.hostname, "chat.test");
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            delay_secs: 7,
            max_attempts: Some(4),
        };
        assert_eq!(
            RetryPolicy::from(&config),
            RetryPolicy {
                delay: Duration::from_secs(7),
                max_attempts: Some(4),
            }
        );
    }
}
