//! `GET /api/v1/channel`: WebSocket upgrade.
//!
//! The credential is verified before the upgrade is accepted. A rejected
//! handshake is a plain 401 response; no socket, session, or room
//! subscription is created for it.

use crate::auth::token_from_handshake;
use crate::channel::ChannelSession;
use crate::errors::ChatError;
use crate::routes::AppState;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    /// For browser clients, which cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

#[instrument(skip_all, name = "chat.channel.handshake")]
pub async fn channel_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ChatError> {
    let token = token_from_handshake(&headers, query.token.as_deref()).ok_or_else(|| {
        debug!(target: "chat.channel", "Handshake without credential");
        ChatError::Unauthenticated("Missing credential".to_string())
    })?;

    let authenticated = state.authenticator.authenticate(token).await?;

    let ws = ws.ok_or_else(|| ChatError::BadRequest("WebSocket upgrade required".to_string()))?;

    let session = ChannelSession::new(
        authenticated,
        Arc::clone(&state.authenticator),
        Arc::clone(&state.rooms),
        Arc::clone(&state.messages),
        state.config.channel_reverify_interval,
        state.shutdown.child_token(),
    );

    Ok(ws.on_upgrade(move |socket| session.run(socket)).into_response())
}
