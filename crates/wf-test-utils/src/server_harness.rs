//! Server harnesses for end-to-end tests.
//!
//! Each harness serves the real router on `127.0.0.1:0` with seeded stores
//! and the fixture key for seed 1. Metrics go to a standalone Prometheus
//! recorder so harnesses never fight over the global one.

use crate::crypto_fixtures::{otp_secret_b64, public_key_b64, signing_key_b64, test_codec, TEST_KEY_ID};
use crate::fixtures::{seeded_conversation_store, seeded_identity_store, RecordingNotificationSender};
use crate::token_builders::TestTokenBuilder;
use auth_service::services::token_service::TokenPair;
use auth_service::store::InMemoryEphemeralStore;
use chat_service::repositories::InMemoryConversationStore;
use common::credential::CredentialCodec;
use common::identity::InMemoryIdentityStore;
use common::types::{Role, SubjectId, SubjectIdentity};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Key seed shared by both harnesses, so chat accepts what auth issues.
pub const HARNESS_KEY_SEED: u8 = 1;

async fn serve(app: axum::Router) -> Result<(SocketAddr, JoinHandle<()>), anyhow::Error> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

    let handle = tokio::spawn(async move {
        let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, make_service).await {
            eprintln!("Test server error: {}", e);
        }
    });
    Ok((addr, handle))
}

fn vars(pairs: Vec<(&str, String)>, overrides: &[(&str, &str)]) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    vars
}

/// Running auth service.
///
/// # Example
/// ```rust,ignore
/// let auth = TestAuthServer::spawn_with(&[("AUTH_ACCESS_TOKEN_TTL_SECONDS", "1")]).await?;
/// let pair = auth.login(U1);
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    state: Arc<auth_service::routes::AppState>,
    identities: Arc<InMemoryIdentityStore>,
    notifier: Arc<RecordingNotificationSender>,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn with extra `AUTH_*` variables layered over the defaults.
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let config = auth_service::config::Config::from_vars(&vars(
            vec![
                ("AUTH_BIND_ADDRESS", "127.0.0.1:0".to_string()),
                ("AUTH_SIGNING_KEY", signing_key_b64(HARNESS_KEY_SEED)),
                ("AUTH_SIGNING_KEY_ID", TEST_KEY_ID.to_string()),
                ("AUTH_OTP_SECRET", otp_secret_b64()),
            ],
            overrides,
        ))?;

        let identities = Arc::new(seeded_identity_store());
        let notifier = Arc::new(RecordingNotificationSender::new());
        let state = Arc::new(auth_service::routes::AppState::from_config(
            config,
            identities.clone(),
            Arc::new(InMemoryEphemeralStore::new()),
            notifier.clone(),
        )?);

        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = auth_service::routes::build_routes(state.clone(), metrics_handle);
        let (addr, handle) = serve(app).await?;

        Ok(Self {
            addr,
            state,
            identities,
            notifier,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &auth_service::routes::AppState {
        &self.state
    }

    pub fn identities(&self) -> &InMemoryIdentityStore {
        &self.identities
    }

    pub fn notifier(&self) -> &RecordingNotificationSender {
        &self.notifier
    }

    /// Issue a credential pair directly, skipping the code exchange.
    pub fn login(&self, subject: &str, role: Role) -> TokenPair {
        self.state
            .issuer
            .login(&SubjectIdentity {
                subject_id: SubjectId::new(subject),
                role,
            })
            .expect("harness issuer must sign")
    }
}

/// Running chat service with trip `T1` seeded.
pub struct TestChatServer {
    addr: SocketAddr,
    state: Arc<chat_service::routes::AppState>,
    identities: Arc<InMemoryIdentityStore>,
    conversations: Arc<InMemoryConversationStore>,
    codec: CredentialCodec,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestChatServer {
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn with extra `CHAT_*` variables layered over the defaults.
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let config = chat_service::config::Config::from_vars(&vars(
            vec![
                ("CHAT_BIND_ADDRESS", "127.0.0.1:0".to_string()),
                ("AUTH_PUBLIC_KEY", public_key_b64(HARNESS_KEY_SEED)),
                ("AUTH_SIGNING_KEY_ID", TEST_KEY_ID.to_string()),
            ],
            overrides,
        ))?;

        let identities = Arc::new(seeded_identity_store());
        let conversations = Arc::new(seeded_conversation_store());
        let shutdown = CancellationToken::new();
        let state = Arc::new(chat_service::routes::AppState::from_config(
            config,
            identities.clone(),
            conversations.clone(),
            shutdown.clone(),
        )?);

        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = chat_service::routes::build_routes(state.clone(), metrics_handle);
        let (addr, handle) = serve(app).await?;

        Ok(Self {
            addr,
            state,
            identities,
            conversations,
            codec: test_codec(HARNESS_KEY_SEED),
            shutdown,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// `ws://` URL of the channel endpoint.
    pub fn channel_url(&self) -> String {
        format!("ws://{}/api/v1/channel", self.addr)
    }

    pub fn state(&self) -> &chat_service::routes::AppState {
        &self.state
    }

    pub fn identities(&self) -> &InMemoryIdentityStore {
        &self.identities
    }

    pub fn conversations(&self) -> &InMemoryConversationStore {
        &self.conversations
    }

    /// Codec holding the signing half of the key this server trusts.
    pub fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    /// Valid access credential for `subject`.
    pub fn access_token(&self, subject: &str, role: Role) -> String {
        TestTokenBuilder::new(&self.codec)
            .for_subject(subject)
            .with_role(role)
            .build()
    }
}

impl Drop for TestChatServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}
