use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::credential::CredentialError;
use common::error::ErrorKind;
use common::identity::IdentityStoreError;
use serde::Serialize;
use thiserror::Error;

/// `WWW-Authenticate` value attached to every 401.
pub const WWW_AUTHENTICATE_VALUE: &str = r#"Bearer realm="wayfare", error="invalid_token""#;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The refresh credential failed verification, had the wrong kind, or
    /// was already rotated or revoked.
    #[error("Invalid refresh credential")]
    InvalidRefresh,

    /// Wrong, expired, or already consumed one-time code.
    #[error("Invalid login code")]
    InvalidCode,

    #[error("Too many failed login attempts")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal server error")]
    Internal,
}

impl AuthError {
    /// Taxonomy code for this failure, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AuthError::InvalidRefresh => Some(ErrorKind::InvalidRefresh),
            AuthError::InvalidCode => Some(ErrorKind::Unauthenticated),
            _ => None,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Store(err.to_string())
    }
}

impl From<IdentityStoreError> for AuthError {
    fn from(err: IdentityStoreError) -> Self {
        AuthError::Store(err.to_string())
    }
}

impl From<CredentialError> for AuthError {
    /// Issue-side credential failures. Verification failures never reach
    /// this conversion; the token service maps them to `InvalidRefresh`.
    fn from(err: CredentialError) -> Self {
        AuthError::Signing(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::InvalidRefresh => (
                StatusCode::UNAUTHORIZED,
                "INVALID_REFRESH",
                "The refresh token is invalid".to_string(),
            ),
            AuthError::InvalidCode => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CODE",
                "The login code is invalid or expired".to_string(),
            ),
            AuthError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests. Please try again later.".to_string(),
            ),
            AuthError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            AuthError::Signing(reason) => {
                tracing::error!(target: "auth.errors", reason = %reason, "Credential signing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AuthError::Store(reason) => {
                tracing::error!(target: "auth.errors", reason = %reason, "Store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(value) = WWW_AUTHENTICATE_VALUE.parse() {
                response.headers_mut().insert("WWW-Authenticate", value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_refresh_is_401_with_challenge() {
        let response = AuthError::InvalidRefresh.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            WWW_AUTHENTICATE_VALUE
        );
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_REFRESH");
    }

    #[tokio::test]
    async fn test_rate_limited_is_429_without_challenge() {
        let response = AuthError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("WWW-Authenticate").is_none());
    }

    #[tokio::test]
    async fn test_internal_details_not_leaked() {
        let response = AuthError::Store("redis exploded at 10.0.0.3".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AuthError::InvalidRefresh.kind(), Some(ErrorKind::InvalidRefresh));
        assert_eq!(AuthError::InvalidCode.kind(), Some(ErrorKind::Unauthenticated));
        assert_eq!(AuthError::RateLimited.kind(), None);
    }
}
