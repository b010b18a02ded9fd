//! Conversation authorization.
//!
//! Membership is read from the conversation store on every call, so a change
//! to a trip's drivers or riders applies to the next check.

use crate::errors::ChatError;
use crate::observability::metrics;
use crate::repositories::{ConversationEntity, ConversationStore};
use common::types::{ConversationId, SubjectId};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ConversationAuthorizer {
    store: Arc<dyn ConversationStore>,
}

impl ConversationAuthorizer {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Resolve `conversation_id` and require `subject_id` to be one of its
    /// drivers or riders.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the conversation does not exist
    /// - `Forbidden` if the subject is not a participant
    pub async fn authorize(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
    ) -> Result<ConversationEntity, ChatError> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await
            .map_err(|e| {
                warn!(target: "chat.authz", error = %e, "Conversation lookup failed");
                ChatError::Internal(e.to_string())
            })?
            .ok_or_else(|| {
                debug!(target: "chat.authz", conversation_id = %conversation_id, "Conversation not found");
                metrics::record_authorization_denied("not_found");
                ChatError::NotFound
            })?;

        if !conversation.is_participant(subject_id) {
            debug!(
                target: "chat.authz",
                conversation_id = %conversation_id,
                subject_id = %subject_id,
                "Subject is not a participant"
            );
            metrics::record_authorization_denied("forbidden");
            return Err(ChatError::Forbidden);
        }

        Ok(conversation)
    }
}
