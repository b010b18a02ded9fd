//! Identity store collaborator.
//!
//! User and driver records live in an external system. The services only need
//! to know whether a subject still exists and which role it holds, so this
//! module defines that lookup as a trait plus an in-process implementation.

use crate::types::{Role, SubjectId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Snapshot of a subject as held by the identity store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub id: SubjectId,
    pub role: Role,
    pub display_name: String,
    /// Where one-time login codes are delivered (email address or phone).
    pub contact: String,
}

impl fmt::Debug for SubjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRecord")
            .field("id", &"[REDACTED]")
            .field("role", &self.role)
            .field("display_name", &self.display_name)
            .field("contact", &"[REDACTED]")
            .finish()
    }
}

/// Errors from an identity store backend.
#[derive(Debug, thiserror::Error)]
pub enum IdentityStoreError {
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Subject lookup.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find a subject by id. `Ok(None)` means the subject does not exist
    /// (never created, or deleted).
    async fn find_subject(&self, id: &SubjectId)
        -> Result<Option<SubjectRecord>, IdentityStoreError>;
}

/// Identity store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    subjects: RwLock<HashMap<SubjectId, SubjectRecord>>,
}

impl InMemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records.
    #[must_use]
    pub fn with_subjects(records: impl IntoIterator<Item = SubjectRecord>) -> Self {
        let subjects = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            subjects: RwLock::new(subjects),
        }
    }

    /// Insert or replace a subject.
    pub async fn upsert(&self, record: SubjectRecord) {
        self.subjects.write().await.insert(record.id.clone(), record);
    }

    /// Delete a subject. Returns whether it existed.
    pub async fn remove(&self, id: &SubjectId) -> bool {
        self.subjects.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_subject(
        &self,
        id: &SubjectId,
    ) -> Result<Option<SubjectRecord>, IdentityStoreError> {
        Ok(self.subjects.read().await.get(id).cloned())
    }
}
