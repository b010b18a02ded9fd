//! Refresh endpoint client.
//!
//! Rotation requests go straight to the auth service and never pass through
//! the request interceptor, so a rejected refresh credential cannot trigger
//! another renewal.

use crate::config::SessionClientConfig;
use crate::errors::RefreshError;
use crate::session::Session;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

/// Exchanges a refresh credential for a new session.
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    /// Rotate `refresh_token` into a brand-new pair.
    async fn rotate(&self, refresh_token: &SecretString) -> Result<Session, RefreshError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`TokenRefresher`] that calls `POST /api/v1/auth/refresh`.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTokenRefresher {
    #[must_use]
    pub fn new(config: &SessionClientConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            url: config.refresh_url(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    #[instrument(skip_all)]
    async fn rotate(&self, refresh_token: &SecretString) -> Result<Session, RefreshError> {
        debug!(target: "session.refresher", url = %self.url, "Requesting credential rotation");

        let response = self
            .http_client
            .post(&self.url)
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                debug!(target: "session.refresher", error = %e, "Refresh request failed");
                if e.is_timeout() {
                    RefreshError::Timeout
                } else {
                    RefreshError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Session>().await.map_err(|e| {
                warn!(target: "session.refresher", error = %e, "Failed to parse refresh response");
                RefreshError::Transport(format!("invalid refresh response: {e}"))
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            warn!(target: "session.refresher", status = %status, "Refresh credential rejected");
            if let Ok(body) = response.text().await {
                trace!(target: "session.refresher", body = %body, "Refresh rejection body");
            }
            return Err(RefreshError::InvalidRefresh);
        }

        warn!(target: "session.refresher", status = %status, "Unexpected refresh response");
        Err(RefreshError::Transport(format!(
            "unexpected refresh status: {status}"
        )))
    }
}
