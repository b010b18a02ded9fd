use crate::errors::AuthError;
use crate::routes::AppState;
use crate::services::token_service::TokenPair;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use common::secret::{ExposeSecret, SecretString};
use common::types::SubjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRequest {
    pub subject_id: SubjectId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpVerifyRequest {
    pub subject_id: SubjectId,
    pub code: SecretString,
}

/// Body of both `/refresh` and `/logout`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access.token.expose_secret().to_string(),
            refresh_token: pair.refresh.token.expose_secret().to_string(),
            token_type: "Bearer",
            expires_in: pair.expires_in,
        }
    }
}

/// Map axum's plain-text JSON rejections onto the service error body.
fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AuthError::BadRequest(rejection.body_text()))
}

fn require_subject(subject_id: &SubjectId) -> Result<(), AuthError> {
    if subject_id.as_str().trim().is_empty() {
        return Err(AuthError::BadRequest("subjectId must not be empty".to_string()));
    }
    Ok(())
}

/// POST /api/v1/auth/otp/request
///
/// Always 202 for a well-formed request, whether or not the subject exists.
pub async fn request_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OtpRequest>, JsonRejection>,
) -> Result<StatusCode, AuthError> {
    let request = parse_body(payload)?;
    require_subject(&request.subject_id)?;

    state.otp.request_code(&request.subject_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/auth/otp/verify
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OtpVerifyRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let request = parse_body(payload)?;
    require_subject(&request.subject_id)?;

    let pair = state
        .otp
        .verify_code(&request.subject_id, &request.code)
        .await?;
    Ok(Json(pair.into()))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let request = parse_body(payload)?;

    let pair = state
        .issuer
        .rotate(request.refresh_token.expose_secret())
        .await?;
    Ok(Json(pair.into()))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<StatusCode, AuthError> {
    let request = parse_body(payload)?;

    state
        .issuer
        .logout(request.refresh_token.expose_secret())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
