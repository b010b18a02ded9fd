//! Session renewal against a real auth service and chat service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::secret::ExposeSecret;
use common::types::Role;
use futures::future::join_all;
use serde_json::Value;
use session_client::{InterceptError, RefreshError, Session, SessionClient, SessionClientConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wf_test_utils::{tamper, TestAuthServer, TestChatServer, T1, U1};

struct Stack {
    auth: TestAuthServer,
    chat: TestChatServer,
}

impl Stack {
    async fn spawn() -> Self {
        Self {
            auth: TestAuthServer::spawn_with(&[("AUTH_ACCESS_TOKEN_TTL_SECONDS", "2")])
                .await
                .unwrap(),
            chat: TestChatServer::spawn().await.unwrap(),
        }
    }

    fn client(&self, session: Session) -> SessionClient {
        let config = SessionClientConfig::new(self.auth.url());
        let (client, _task) =
            SessionClient::start(&config, Some(session), CancellationToken::new()).unwrap();
        client
    }

    fn messages_url(&self) -> String {
        format!("{}/api/v1/conversations/{T1}/messages", self.chat.url())
    }
}

/// (access, refresh) strings for a freshly logged-in rider.
fn login(stack: &Stack) -> (String, String) {
    let pair = stack.auth.login(U1, Role::Rider);
    (
        pair.access.token.expose_secret().to_string(),
        pair.refresh.token.expose_secret().to_string(),
    )
}

#[tokio::test]
async fn test_expired_access_renewed_once_for_concurrent_calls() {
    let stack = Stack::spawn().await;
    let (access, refresh) = login(&stack);
    let client = stack.client(Session::new(access.clone(), refresh.clone()));

    // Let the two-second access credential lapse.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let url = stack.messages_url();
    let calls = (0..5).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move { client.http().get_json::<Value>(&url).await }
    });
    for result in join_all(calls).await {
        assert_eq!(result.unwrap()["conversationId"], T1);
    }

    let state = client.interceptor().coordinator().state().await.unwrap();
    assert_eq!(state.rotations_started, 1);
    assert!(!state.in_flight);

    let session = client.store().current().unwrap();
    assert_ne!(session.refresh_token.expose_secret(), refresh);
    assert_ne!(session.access_token.expose_secret(), access);

    // The original refresh credential was consumed by the rotation.
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/auth/refresh", stack.auth.url()))
        .json(&serde_json::json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_refresh_fails_and_clears_session() {
    let stack = Stack::spawn().await;
    let (access, refresh) = login(&stack);
    let client = stack.client(Session::new(access, tamper(&refresh)));

    tokio::time::sleep(Duration::from_secs(3)).await;

    let result = client.http().get_json::<Value>(&stack.messages_url()).await;
    assert!(matches!(
        result,
        Err(InterceptError::Refresh(RefreshError::InvalidRefresh))
    ));
    assert!(!client.store().is_authenticated());

    // Nothing left to renew with.
    let result = client
        .interceptor()
        .coordinator()
        .renew(None)
        .await;
    assert_eq!(result.unwrap_err(), RefreshError::Unauthenticated);
}
