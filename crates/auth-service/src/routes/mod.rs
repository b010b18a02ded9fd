//! HTTP routes for the auth service.

use crate::config::{Config, ConfigError};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::notification::NotificationSender;
use crate::services::otp_service::{OtpPolicy, OtpService};
use crate::services::token_service::{EphemeralRevocationStore, TokenIssuer, TokenPolicy};
use crate::store::EphemeralStore;
use axum::{middleware, routing::get, routing::post, Router};
use common::identity::IdentityStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub issuer: Arc<TokenIssuer>,
    pub otp: Arc<OtpService>,
}

impl AppState {
    /// Wire the token issuer and OTP service from configuration and
    /// collaborators.
    pub fn from_config(
        config: Config,
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Result<Self, ConfigError> {
        let codec = Arc::new(config.credential_codec()?);
        let issuer = Arc::new(TokenIssuer::new(
            codec,
            TokenPolicy {
                access_ttl: config.access_token_ttl,
                refresh_ttl: config.refresh_token_ttl,
            },
            Arc::new(EphemeralRevocationStore::new(Arc::clone(&store))),
            Arc::clone(&identities),
        ));
        let otp = Arc::new(OtpService::new(
            identities,
            store,
            notifier,
            Arc::clone(&issuer),
            &config.otp_key_bytes()?,
            OtpPolicy {
                code_ttl: config.otp_ttl,
                max_attempts: config.max_login_attempts,
                lockout_window: config.lockout_window,
            },
        ));
        Ok(Self {
            config,
            issuer,
            otp,
        })
    }
}

/// Build the application routes.
///
/// - `/health` - liveness probe
/// - `/metrics` - Prometheus metrics
/// - `/api/v1/auth/otp/request`, `/api/v1/auth/otp/verify` - code login
/// - `/api/v1/auth/refresh` - rotate a refresh credential
/// - `/api/v1/auth/logout` - revoke a refresh credential
///
/// All auth endpoints are public: the credential being exchanged is the body.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/auth/otp/request", post(handlers::request_code))
        .route("/api/v1/auth/otp/verify", post(handlers::verify_code))
        .route("/api/v1/auth/refresh", post(handlers::refresh))
        .route("/api/v1/auth/logout", post(handlers::logout))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
