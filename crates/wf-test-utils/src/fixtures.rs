//! Seeded collaborators: identity store, trips and a notification sender
//! that hands login codes back to the test.

use crate::test_ids::{D1, T1, U1, U2};
use async_trait::async_trait;
use auth_service::services::notification::NotificationSender;
use chat_service::repositories::{InMemoryConversationStore, OneOrMany, TripRecord};
use common::identity::{InMemoryIdentityStore, SubjectRecord};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConversationId, Role, SubjectId};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub fn subject_record(id: &str, role: Role) -> SubjectRecord {
    SubjectRecord {
        id: SubjectId::new(id),
        role,
        display_name: format!("Test {id}"),
        contact: format!("{}@example.test", id.to_lowercase()),
    }
}

/// `D1` (driver), `U1` and `U2` (riders).
pub fn seeded_subjects() -> Vec<SubjectRecord> {
    vec![
        subject_record(D1, Role::Driver),
        subject_record(U1, Role::Rider),
        subject_record(U2, Role::Rider),
    ]
}

pub fn seeded_identity_store() -> InMemoryIdentityStore {
    InMemoryIdentityStore::with_subjects(seeded_subjects())
}

/// `T1` with driver `D1` and rider `U1`.
pub fn trip_t1() -> TripRecord {
    TripRecord {
        id: ConversationId::new(T1),
        driver: OneOrMany::One(SubjectId::new(D1)),
        riders: vec![SubjectId::new(U1)],
    }
}

pub fn seeded_conversation_store() -> InMemoryConversationStore {
    InMemoryConversationStore::with_trips([trip_t1()])
}

/// Notification sender that records every code it is asked to deliver.
pub struct RecordingNotificationSender {
    tx: mpsc::UnboundedSender<(SubjectId, String)>,
    rx: Mutex<mpsc::UnboundedReceiver<(SubjectId, String)>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Next code sent to `subject`, skipping codes for anyone else. Panics
    /// after five seconds.
    pub async fn wait_for_code(&self, subject: &str) -> String {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (recipient, code) = rx.recv().await.expect("sender alive");
                if recipient.as_str() == subject {
                    return code;
                }
            }
        })
        .await
        .expect("login code was not sent")
    }

    /// Whether a code is waiting, without blocking.
    pub async fn has_pending(&self) -> bool {
        !self.rx.lock().await.is_empty()
    }
}

impl Default for RecordingNotificationSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_login_code(&self, recipient: &SubjectRecord, code: &SecretString) {
        let _ = self
            .tx
            .send((recipient.id.clone(), code.expose_secret().to_string()));
    }
}
