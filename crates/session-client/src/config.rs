//! Session client configuration.

use crate::errors::RefreshError;
use std::time::Duration;

/// Upper bound on one rotation round-trip before it is treated as failed.
pub const DEFAULT_ROTATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the refresh endpoint on the auth service.
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// Configuration for a session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClientConfig {
    /// Auth service base URL (e.g. `https://auth.wayfare.example`).
    pub auth_endpoint: String,

    /// Bound on a single rotation.
    pub rotate_timeout: Duration,

    /// Timeout applied to every HTTP request made by the client.
    pub http_timeout: Duration,
}

impl SessionClientConfig {
    /// Create a configuration with default timeouts.
    ///
    /// Plain `http://` endpoints are accepted here for local development and
    /// tests. Use [`SessionClientConfig::new_secure`] in production.
    #[must_use]
    pub fn new(auth_endpoint: impl Into<String>) -> Self {
        let auth_endpoint: String = auth_endpoint.into();
        Self {
            auth_endpoint: auth_endpoint.trim_end_matches('/').to_string(),
            rotate_timeout: DEFAULT_ROTATE_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create a configuration that requires HTTPS.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError::Configuration` if the URL is not `https://`.
    pub fn new_secure(auth_endpoint: impl Into<String>) -> Result<Self, RefreshError> {
        let auth_endpoint: String = auth_endpoint.into();
        if !auth_endpoint.starts_with("https://") {
            return Err(RefreshError::Configuration(
                "auth endpoint must use HTTPS".into(),
            ));
        }
        Ok(Self::new(auth_endpoint))
    }

    #[must_use]
    pub fn with_rotate_timeout(mut self, timeout: Duration) -> Self {
        self.rotate_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Full URL of the refresh endpoint.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}{REFRESH_PATH}", self.auth_endpoint)
    }

    /// Build the HTTP client used for refresh and authorized calls.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError::Configuration` if the client cannot be built.
    pub fn build_http_client(&self) -> Result<reqwest::Client, RefreshError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RefreshError::Configuration(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionClientConfig::new("http://localhost:8082");
        assert_eq!(config.rotate_timeout, DEFAULT_ROTATE_TIMEOUT);
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.rotate_timeout.as_secs(), 10);
    }

    #[test]
    fn test_builder() {
        let config = SessionClientConfig::new("http://localhost:8082/")
            .with_rotate_timeout(Duration::from_secs(2))
            .with_http_timeout(Duration::from_secs(3));
        assert_eq!(config.rotate_timeout, Duration::from_secs(2));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(
            config.refresh_url(),
            "http://localhost:8082/api/v1/auth/refresh"
        );
    }

    #[test]
    fn test_new_secure_requires_https() {
        assert!(SessionClientConfig::new_secure("https://auth.example").is_ok());
        assert!(matches!(
            SessionClientConfig::new_secure("http://auth.example"),
            Err(RefreshError::Configuration(_))
        ));
    }
}
