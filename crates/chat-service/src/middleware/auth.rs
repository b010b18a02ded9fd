//! Bearer authentication for the chat HTTP API.
//!
//! Resolves the credential through the same [`ChannelAuthenticator`] the
//! WebSocket handshake uses and stores the [`SubjectIdentity`] in request
//! extensions.

use crate::auth::ChannelAuthenticator;
use crate::errors::ChatError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::secret::parse_bearer;
use common::types::SubjectIdentity;
use std::sync::Arc;
use tracing::instrument;

fn extract_bearer_token(req: &Request) -> Result<&str, ChatError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "chat.middleware.auth", "Missing Authorization header");
            ChatError::Unauthenticated("Missing Authorization header".to_string())
        })?;

    parse_bearer(header).ok_or_else(|| {
        tracing::debug!(target: "chat.middleware.auth", "Invalid Authorization header format");
        ChatError::Unauthenticated("Invalid Authorization header format".to_string())
    })
}

/// Reject with 401 unless the request carries a valid access credential for
/// an existing subject.
#[instrument(skip_all, name = "chat.middleware.auth")]
pub async fn require_auth(
    State(authenticator): State<Arc<ChannelAuthenticator>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ChatError> {
    let token = extract_bearer_token(&req)?;
    let authenticated = authenticator.authenticate(token).await?;

    req.extensions_mut()
        .insert::<SubjectIdentity>(authenticated.identity);

    Ok(next.run(req).await)
}
