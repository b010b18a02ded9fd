//! Conversation message API.

use crate::errors::ChatError;
use crate::observability::metrics;
use crate::repositories::Message;
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{ConversationId, SubjectIdentity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
}

/// GET /api/v1/conversations/:id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SubjectIdentity>,
    Path(conversation_id): Path<String>,
) -> Result<Json<MessageListResponse>, ChatError> {
    let conversation_id = ConversationId::new(conversation_id);
    let messages = state
        .messages
        .list_messages(&conversation_id, &identity.subject_id)
        .await?;

    Ok(Json(MessageListResponse {
        conversation_id,
        messages,
    }))
}

/// POST /api/v1/conversations/:id/messages
///
/// Persists through the conversation's room so live channel subscribers get
/// the message too.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SubjectIdentity>,
    Path(conversation_id): Path<String>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let conversation_id = ConversationId::new(conversation_id);
    let Json(request) = payload.map_err(|rejection| ChatError::BadRequest(rejection.body_text()))?;

    let message = state
        .rooms
        .publish(&conversation_id, &identity.subject_id, &request.text)
        .await?;
    metrics::record_message_posted("http");

    Ok((StatusCode::CREATED, Json(message)))
}
