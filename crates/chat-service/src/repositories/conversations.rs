//! Conversation storage.
//!
//! Trip records arrive in the storage shape, where `driver` may be a single
//! id or an array. They are normalized into [`ConversationEntity`] sets here
//! so nothing above this module sees the loose shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConversationId, SubjectId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

/// `driver` as stored: one id or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(SubjectId),
    Many(Vec<SubjectId>),
}

impl OneOrMany {
    pub fn into_set(self) -> HashSet<SubjectId> {
        match self {
            OneOrMany::One(id) => HashSet::from([id]),
            OneOrMany::Many(ids) => ids.into_iter().collect(),
        }
    }
}

/// Trip as stored by the trip system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: ConversationId,
    pub driver: OneOrMany,
    #[serde(default)]
    pub riders: Vec<SubjectId>,
}

/// A conversation and the subjects allowed to take part in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntity {
    pub id: ConversationId,
    pub driver_ids: HashSet<SubjectId>,
    pub rider_ids: HashSet<SubjectId>,
}

impl ConversationEntity {
    /// Whether `subject_id` is a driver or rider of this conversation.
    pub fn is_participant(&self, subject_id: &SubjectId) -> bool {
        self.driver_ids.contains(subject_id) || self.rider_ids.contains(subject_id)
    }

    /// `driver_ids ∪ rider_ids`.
    pub fn participants(&self) -> HashSet<SubjectId> {
        self.driver_ids.union(&self.rider_ids).cloned().collect()
    }
}

impl From<TripRecord> for ConversationEntity {
    fn from(trip: TripRecord) -> Self {
        Self {
            id: trip.id,
            driver_ids: trip.driver.into_set(),
            rider_ids: trip.riders.into_iter().collect(),
        }
    }
}

/// A chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: ConversationId,
    pub author_subject_id: SubjectId,
    pub text: String,
    /// Server-assigned; RFC 3339 on the wire.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),

    #[error("conversation {0} does not exist")]
    MissingConversation(ConversationId),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationEntity>, ConversationStoreError>;

    /// Persist a message. `created_at` is assigned here and never decreases
    /// within a conversation.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        author: &SubjectId,
        text: &str,
    ) -> Result<Message, ConversationStoreError>;

    /// Messages in creation order.
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ConversationStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    trips: RwLock<HashMap<ConversationId, TripRecord>>,
    messages: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trips(trips: impl IntoIterator<Item = TripRecord>) -> Self {
        Self {
            trips: RwLock::new(trips.into_iter().map(|t| (t.id.clone(), t)).collect()),
            messages: RwLock::default(),
        }
    }

    /// Insert or replace a trip. Membership changes apply to the next
    /// authorization check.
    pub async fn upsert_trip(&self, trip: TripRecord) {
        self.trips.write().await.insert(trip.id.clone(), trip);
    }

    pub async fn remove_trip(&self, id: &ConversationId) -> bool {
        self.trips.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationEntity>, ConversationStoreError> {
        Ok(self
            .trips
            .read()
            .await
            .get(id)
            .cloned()
            .map(ConversationEntity::from))
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        author: &SubjectId,
        text: &str,
    ) -> Result<Message, ConversationStoreError> {
        if !self.trips.read().await.contains_key(conversation_id) {
            return Err(ConversationStoreError::MissingConversation(
                conversation_id.clone(),
            ));
        }

        let mut messages = self.messages.write().await;
        let history = messages.entry(conversation_id.clone()).or_default();

        // Wall clock can step backwards; keep history ordered anyway.
        let now = Utc::now();
        let created_at = history
            .last()
            .map_or(now, |last| now.max(last.created_at));

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            author_subject_id: author.clone(),
            text: text.to_string(),
            created_at,
        };
        history.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ConversationStoreError> {
        Ok(self
            .messages
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
