//! Integration tests for the tarpc transport.
//!
//! These tests spin up the real chat server and real clients. No mocks are
//! used.

mod service_tests;

use crate::config::{ServerConfig, SessionConfig};
use crate::executor::ImmediateExecutor;
use crate::rpc::chat_service::ChatServiceClient;
use crate::rpc_remote::RpcAuthenticator;
use crate::server::{start_chat_server, ChatServerHandle};
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tarpc::client;
use tarpc::tokio_serde::formats::Bincode;

/// Test harness that manages a real chat server.
pub struct TestServer {
    pub handle: ChatServerHandle,
}

impl TestServer {
    /// Start a server on free ports with accounts alice/wonderland,
    /// bob/builder and userid/secret.
    pub async fn start() -> Self {
        Self::start_with_timeout(60).await
    }

    pub async fn start_with_timeout(session_timeout_secs: u64) -> Self {
        let config = ServerConfig {
            address: "127.0.0.1:0".to_string(),
            subscriber_port: 0,
            session_timeout_secs,
            accounts: [("alice", "wonderland"), ("bob", "builder"), ("userid", "secret")]
                .into_iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        };
        let handle = start_chat_server(&config).await.unwrap();
        Self { handle }
    }

    pub fn address(&self) -> String {
        self.handle.address.to_string()
    }

    /// Create a raw service client connected to this server.
    pub async fn create_client(&self) -> ChatServiceClient {
        use tarpc::serde_transport::tcp;

        let transport = tcp::connect(self.handle.address, Bincode::default)
            .await
            .unwrap();
        ChatServiceClient::new(client::Config::default(), transport).spawn()
    }

    /// Session manager logging in to this server.
    pub fn manager(&self) -> SessionManager {
        SessionManager::new(
            SessionConfig::default(),
            Arc::new(RpcAuthenticator::new(self.address())),
            Arc::new(ImmediateExecutor),
        )
    }

    /// Waits until `count` subscribers are registered.
    pub async fn wait_for_subscribers(&self, count: usize) {
        wait_until(|| {
            self.handle
                .subscribers
                .try_read()
                .is_ok_and(|registry| registry.count() == count)
        })
        .await;
    }

    /// Waits until `count` sessions are open.
    pub async fn wait_for_sessions(&self, count: usize) {
        wait_until(|| {
            self.handle
                .state
                .try_lock()
                .is_ok_and(|state| state.session_count() == count)
        })
        .await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Polls `condition` every 20ms, failing the test after 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
