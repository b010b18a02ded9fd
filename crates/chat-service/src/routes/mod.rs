//! HTTP routes for the chat service.

use crate::actors::RoomRegistry;
use crate::auth::ChannelAuthenticator;
use crate::config::{Config, ConfigError};
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth};
use crate::repositories::ConversationStore;
use crate::services::MessageService;
use axum::{middleware, routing::get, Router};
use common::identity::IdentityStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub authenticator: Arc<ChannelAuthenticator>,
    pub messages: Arc<MessageService>,
    pub rooms: Arc<RoomRegistry>,
    /// Parent of every room and channel task.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(
        config: Config,
        identities: Arc<dyn IdentityStore>,
        conversations: Arc<dyn ConversationStore>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let codec = Arc::new(config.credential_codec()?);
        let authenticator = Arc::new(ChannelAuthenticator::new(codec, identities));
        let messages = Arc::new(MessageService::new(
            conversations,
            config.max_message_chars,
        ));
        let rooms = Arc::new(RoomRegistry::new(
            Arc::clone(&messages),
            shutdown.child_token(),
        ));
        Ok(Self {
            config,
            authenticator,
            messages,
            rooms,
            shutdown,
        })
    }
}

/// Build the application routes.
///
/// Public:
/// - `/health`, `/metrics`
/// - `/api/v1/channel` (authenticates during the handshake itself)
///
/// Bearer-protected:
/// - `GET|POST /api/v1/conversations/:id/messages`
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/channel", get(handlers::channel_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/v1/conversations/:id/messages",
            get(handlers::list_messages).post(handlers::post_message),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.authenticator),
            require_auth,
        ))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    public_routes
        .merge(protected_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
