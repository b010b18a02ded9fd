//! Message reads and writes, always behind conversation authorization.

use crate::errors::ChatError;
use crate::repositories::{ConversationEntity, ConversationStore, Message};
use crate::services::authorization::ConversationAuthorizer;
use common::types::{ConversationId, SubjectId};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct MessageService {
    authorizer: ConversationAuthorizer,
    store: Arc<dyn ConversationStore>,
    max_message_chars: usize,
}

impl MessageService {
    pub fn new(store: Arc<dyn ConversationStore>, max_message_chars: usize) -> Self {
        Self {
            authorizer: ConversationAuthorizer::new(Arc::clone(&store)),
            store,
            max_message_chars,
        }
    }

    pub async fn authorize(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
    ) -> Result<ConversationEntity, ChatError> {
        self.authorizer.authorize(conversation_id, subject_id).await
    }

    /// History of a conversation the subject participates in, oldest first.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
    ) -> Result<Vec<Message>, ChatError> {
        self.authorize(conversation_id, subject_id).await?;
        self.store
            .list_messages(conversation_id)
            .await
            .map_err(|e| {
                warn!(target: "chat.messages", error = %e, "Failed to list messages");
                ChatError::Internal(e.to_string())
            })
    }

    /// Authorize, validate and persist a message. Stored text is trimmed.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `Forbidden` from authorization
    /// - `BadRequest` if the text is blank or longer than the configured limit;
    ///   nothing is stored in that case
    pub async fn post_message(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
        text: &str,
    ) -> Result<Message, ChatError> {
        self.post_message_with_members(conversation_id, subject_id, text)
            .await
            .map(|(message, _)| message)
    }

    /// [`post_message`](Self::post_message), also returning the conversation
    /// as read by the authorization check.
    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    pub async fn post_message_with_members(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
        text: &str,
    ) -> Result<(Message, ConversationEntity), ChatError> {
        let conversation = self.authorize(conversation_id, subject_id).await?;
        let text = self.validate_text(text)?;

        let message = self
            .store
            .append_message(conversation_id, subject_id, text)
            .await
            .map_err(|e| {
                warn!(target: "chat.messages", error = %e, "Failed to persist message");
                ChatError::Internal(e.to_string())
            })?;

        debug!(target: "chat.messages", message_id = %message.id, "Message persisted");
        Ok((message, conversation))
    }

    fn validate_text<'a>(&self, text: &'a str) -> Result<&'a str, ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::BadRequest(
                "Message text must not be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > self.max_message_chars {
            return Err(ChatError::BadRequest(format!(
                "Message text must not exceed {} characters",
                self.max_message_chars
            )));
        }
        Ok(trimmed)
    }
}
