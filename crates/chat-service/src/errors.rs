use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::ErrorKind;
use serde::Serialize;
use thiserror::Error;

/// `WWW-Authenticate` value attached to every 401.
pub const WWW_AUTHENTICATE_VALUE: &str = r#"Bearer realm="wayfare", error="invalid_token""#;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Missing, invalid or expired credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The credential is valid but its subject no longer exists.
    #[error("Unknown subject")]
    UnknownSubject,

    #[error("Not a participant in this conversation")]
    Forbidden,

    #[error("Conversation not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ChatError::Unauthenticated(_) => Some(ErrorKind::Unauthenticated),
            ChatError::UnknownSubject => Some(ErrorKind::UnknownSubject),
            ChatError::Forbidden => Some(ErrorKind::Forbidden),
            ChatError::NotFound => Some(ErrorKind::NotFound),
            ChatError::BadRequest(_) | ChatError::Internal(_) => None,
        }
    }

    /// Lowercase code used in channel `error` frames.
    pub fn frame_code(&self) -> &'static str {
        match self {
            ChatError::BadRequest(_) => "bad_request",
            ChatError::Internal(_) => "internal",
            other => other.kind().map_or("internal", ErrorKind::as_str),
        }
    }

    /// Message safe to show a client.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Unauthenticated(_) => "Authentication required".to_string(),
            ChatError::Internal(_) => "An internal error occurred".to_string(),
            ChatError::BadRequest(reason) => reason.clone(),
            other => other.to_string(),
        }
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

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ChatError::Unauthenticated(reason) => {
                tracing::debug!(target: "chat.errors", reason = %reason, "Request unauthenticated");
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED")
            }
            ChatError::UnknownSubject => (StatusCode::UNAUTHORIZED, "UNKNOWN_SUBJECT"),
            ChatError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ChatError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ChatError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ChatError::Internal(reason) => {
                tracing::error!(target: "chat.errors", reason = %reason, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.client_message(),
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
    async fn test_unauthenticated_response() {
        let response = ChatError::Unauthenticated("expired".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            WWW_AUTHENTICATE_VALUE
        );
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        // Verification detail stays server-side.
        assert!(!body.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_forbidden_and_not_found() {
        let response = ChatError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let response = ChatError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn test_frame_codes() {
        assert_eq!(ChatError::Forbidden.frame_code(), "forbidden");
        assert_eq!(ChatError::NotFound.frame_code(), "not_found");
        assert_eq!(ChatError::UnknownSubject.frame_code(), "unknown_subject");
        assert_eq!(
            ChatError::Unauthenticated(String::new()).frame_code(),
            "unauthenticated"
        );
        assert_eq!(ChatError::BadRequest(String::new()).frame_code(), "bad_request");
        assert_eq!(ChatError::Internal(String::new()).frame_code(), "internal");
    }

    #[test]
    fn test_reauthentication_classification() {
        assert!(ChatError::Forbidden.kind().unwrap().forces_reauthentication());
        assert!(!ChatError::NotFound.kind().unwrap().forces_reauthentication());
    }
}
