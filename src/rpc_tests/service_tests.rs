use super::*;
use crate::errors::SessionError;
use crate::remote::{Authenticator, Credentials, PushEvent};
use crate::rpc::ChatError;
use tarpc::context;

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let server = TestServer::start().await;
    let client = server.create_client().await;

    let result = client
        .login(context::current(), "alice".to_string(), "wrong".to_string())
        .await
        .unwrap();

    assert_eq!(result, Err(ChatError::AuthenticationFailed));
    assert_eq!(server.handle.state.lock().await.session_count(), 0);
}

#[tokio::test]
async fn test_login_reports_roster_and_ports() {
    let server = TestServer::start().await;
    let client = server.create_client().await;

    client
        .login(context::current(), "bob".to_string(), "builder".to_string())
        .await
        .unwrap()
        .unwrap();
    let reply = client
        .login(
            context::current(),
            "alice".to_string(),
            "wonderland".to_string(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reply.roster, vec!["alice", "bob"]);
    assert_eq!(reply.subscriber_port, server.handle.subscriber_port);
    assert_eq!(reply.session_timeout_secs, 60);
    assert!(!reply.session_id.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let server = TestServer::start().await;
    let client = server.create_client().await;
    let not_found = Err(ChatError::SessionNotFound {
        session_id: "nope".to_string(),
    });

    let ping = client
        .ping(context::current(), "nope".to_string())
        .await
        .unwrap();
    let send = client
        .send(context::current(), "nope".to_string(), "hi".to_string())
        .await
        .unwrap();

    assert_eq!(ping, not_found);
    assert_eq!(send, not_found);
}

#[tokio::test]
async fn test_logout_closes_session() {
    let server = TestServer::start().await;
    let client = server.create_client().await;
    let reply = client
        .login(context::current(), "bob".to_string(), "builder".to_string())
        .await
        .unwrap()
        .unwrap();

    let first = client
        .logout(context::current(), reply.session_id.clone())
        .await
        .unwrap();
    let second = client
        .logout(context::current(), reply.session_id.clone())
        .await
        .unwrap();

    assert_eq!(first, Ok(()));
    assert!(matches!(second, Err(ChatError::SessionNotFound { .. })));
    assert_eq!(server.handle.state.lock().await.session_count(), 0);
}

#[tokio::test]
async fn test_unpinged_session_expires() {
    let server = TestServer::start_with_timeout(1).await;
    let client = server.create_client().await;
    let reply = client
        .login(context::current(), "bob".to_string(), "builder".to_string())
        .await
        .unwrap()
        .unwrap();

    server.wait_for_sessions(0).await;

    let ping = client
        .ping(context::current(), reply.session_id.clone())
        .await
        .unwrap();
    assert!(matches!(ping, Err(ChatError::SessionNotFound { .. })));
}

#[tokio::test]
async fn test_expired_session_receives_error_push() {
    let server = TestServer::start_with_timeout(1).await;
    let authenticator = RpcAuthenticator::new(server.address());

    let mut established = authenticator
        .establish(&Credentials::new("bob", "builder"))
        .await
        .unwrap();

    let push = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match established.pushes.recv().await {
                Some(PushEvent::Error { message }) => return Some(message),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(push.as_deref(), Some("Session expired"));
}

#[tokio::test]
async fn test_authenticator_maps_errors() {
    let server = TestServer::start().await;
    let authenticator = RpcAuthenticator::new(server.address());

    let auth = authenticator
        .establish(&Credentials::new("bob", "wrong"))
        .await
        .err()
        .unwrap();
    assert!(matches!(auth, SessionError::Auth { .. }));

    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let unreachable = RpcAuthenticator::new(format!("127.0.0.1:{}", port))
        .establish(&Credentials::new("bob", "builder"))
        .await
        .err()
        .unwrap();
    assert!(matches!(unreachable, SessionError::Connect { .. }));
}
