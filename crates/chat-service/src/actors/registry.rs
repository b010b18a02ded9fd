//! `RoomRegistry`: hands out room handles, spawning actors on demand.
//!
//! A room only stops from inside its own loop, after it has confirmed it is
//! empty. A caller that picked up the handle just before that stop gets
//! [`RoomError::Closed`]; the registry then replaces the stale handle and
//! retries once against a fresh actor. Handle generations keep the reaper
//! and the retry path from evicting a room that was already replaced.

use super::messages::RoomState;
use super::room::{RoomActor, RoomError, RoomHandle};
use crate::channel::ServerFrame;
use crate::errors::ChatError;
use crate::observability::metrics;
use crate::repositories::Message;
use crate::services::MessageService;
use common::types::{ConversationId, SubjectId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct RoomRegistry {
    rooms: Mutex<HashMap<ConversationId, RoomHandle>>,
    messages: Arc<MessageService>,
    cancel_token: CancellationToken,
    next_generation: AtomicU64,
}

impl RoomRegistry {
    /// Rooms run on child tokens of `cancel_token`.
    pub fn new(messages: Arc<MessageService>, cancel_token: CancellationToken) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            messages,
            cancel_token,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Subscribe a connection to a conversation room and return its history.
    ///
    /// If authorization fails the connection is not subscribed, and a room
    /// spawned only for this attempt is stopped again.
    pub async fn join(
        &self,
        conversation_id: &ConversationId,
        connection_id: Uuid,
        subject_id: &SubjectId,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<Vec<Message>, ChatError> {
        let result = self
            .with_room(conversation_id, |room| {
                let subject_id = subject_id.clone();
                let sender = sender.clone();
                async move { room.join(connection_id, subject_id, sender).await }
            })
            .await;

        if result.is_err() {
            self.stop_if_empty(conversation_id).await;
        }
        result
    }

    /// Unsubscribe a connection. Never spawns a room.
    pub async fn leave(&self, conversation_id: &ConversationId, connection_id: Uuid) -> bool {
        let Some(room) = self.rooms.lock().await.get(conversation_id).cloned() else {
            return false;
        };
        room.leave(connection_id).await.unwrap_or(false)
    }

    /// Persist a message through the room and broadcast it to subscribers.
    pub async fn publish(
        &self,
        conversation_id: &ConversationId,
        subject_id: &SubjectId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let result = self
            .with_room(conversation_id, |room| {
                let subject_id = subject_id.clone();
                let text = text.to_string();
                async move { room.publish(subject_id, text).await }
            })
            .await;

        if result.is_err() {
            self.stop_if_empty(conversation_id).await;
        }
        result
    }

    /// State of a running room, if there is one.
    pub async fn room_state(&self, conversation_id: &ConversationId) -> Option<RoomState> {
        let room = self.rooms.lock().await.get(conversation_id).cloned()?;
        room.state().await.ok()
    }

    pub async fn active_rooms(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Stop every room that has no subscribers. Returns how many were removed.
    pub async fn reap_empty(&self) -> usize {
        let snapshot: Vec<(ConversationId, RoomHandle)> = self
            .rooms
            .lock()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect();

        let mut reaped = 0;
        for (conversation_id, room) in snapshot {
            // A room that is already gone counts as stopped.
            let stopped = room.stop_if_empty().await.unwrap_or(true);
            if stopped && self.remove_if_current(&conversation_id, &room).await {
                reaped += 1;
            }
        }

        if reaped > 0 {
            debug!(target: "chat.room.registry", reaped, "Reaped empty rooms");
        }
        reaped
    }

    async fn with_room<T, F, Fut>(
        &self,
        conversation_id: &ConversationId,
        call: F,
    ) -> Result<T, ChatError>
    where
        F: Fn(RoomHandle) -> Fut,
        Fut: Future<Output = Result<T, RoomError>>,
    {
        let room = self.get_or_spawn(conversation_id).await;
        match call(room.clone()).await {
            Ok(value) => Ok(value),
            Err(RoomError::Chat(e)) => Err(e),
            Err(RoomError::Closed(_)) => {
                debug!(
                    target: "chat.room.registry",
                    conversation_id = %conversation_id,
                    "Room stopped under a caller, respawning"
                );
                self.remove_if_current(conversation_id, &room).await;
                let room = self.get_or_spawn(conversation_id).await;
                call(room).await.map_err(|e| match e {
                    RoomError::Chat(e) => e,
                    RoomError::Closed(id) => {
                        warn!(target: "chat.room.registry", conversation_id = %id, "Respawned room closed immediately");
                        ChatError::Internal(format!("room {id} unavailable"))
                    }
                })
            }
        }
    }

    async fn get_or_spawn(&self, conversation_id: &ConversationId) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(conversation_id) {
            if !room.is_closed() {
                return room.clone();
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (room, _task) = RoomActor::spawn(
            conversation_id.clone(),
            generation,
            Arc::clone(&self.messages),
            self.cancel_token.child_token(),
        );
        rooms.insert(conversation_id.clone(), room.clone());
        metrics::set_rooms_active(rooms.len());
        debug!(
            target: "chat.room.registry",
            conversation_id = %conversation_id,
            generation,
            "Spawned room"
        );
        room
    }

    async fn stop_if_empty(&self, conversation_id: &ConversationId) {
        let Some(room) = self.rooms.lock().await.get(conversation_id).cloned() else {
            return;
        };
        if room.stop_if_empty().await.unwrap_or(true) {
            self.remove_if_current(conversation_id, &room).await;
        }
    }

    /// Remove `room` from the map unless it has already been replaced.
    async fn remove_if_current(&self, conversation_id: &ConversationId, room: &RoomHandle) -> bool {
        let mut rooms = self.rooms.lock().await;
        let current = rooms
            .get(conversation_id)
            .is_some_and(|r| r.generation() == room.generation());
        if current {
            rooms.remove(conversation_id);
            metrics::set_rooms_active(rooms.len());
        }
        current
    }
}

/// Periodically stop rooms with no subscribers until `cancel_token` fires.
pub fn spawn_reaper(
    registry: Arc<RoomRegistry>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        info!(target: "chat.room.registry", interval_secs = interval.as_secs(), "Room reaper started");
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "chat.room.registry", "Room reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    registry.reap_empty().await;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryConversationStore, OneOrMany, TripRecord};

    fn registry() -> Arc<RoomRegistry> {
        let store = Arc::new(InMemoryConversationStore::with_trips([TripRecord {
            id: ConversationId::new("T1"),
            driver: OneOrMany::One(SubjectId::new("D1")),
            riders: vec![SubjectId::new("U1")],
        }]));
        Arc::new(RoomRegistry::new(
            Arc::new(MessageService::new(store, 2000)),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_failed_join_leaves_no_room_behind() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = registry
            .join(&ConversationId::new("T1"), Uuid::new_v4(), &SubjectId::new("U2"), tx.clone())
            .await;
        assert_eq!(result, Err(ChatError::Forbidden));

        let result = registry
            .join(&ConversationId::new("T404"), Uuid::new_v4(), &SubjectId::new("U1"), tx)
            .await;
        assert_eq!(result, Err(ChatError::NotFound));

        assert_eq!(registry.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_publishes_leave_no_room_behind() {
        let registry = registry();

        for i in 0..20 {
            let result = registry
                .publish(&ConversationId::new(format!("nope-{i}")), &SubjectId::new("U1"), "hi")
                .await;
            assert_eq!(result, Err(ChatError::NotFound));
        }
        let t1 = ConversationId::new("T1");
        let result = registry.publish(&t1, &SubjectId::new("U2"), "hi").await;
        assert_eq!(result, Err(ChatError::Forbidden));
        let result = registry.publish(&t1, &SubjectId::new("U1"), "   ").await;
        assert!(matches!(result, Err(ChatError::BadRequest(_))));

        assert_eq!(registry.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_publish_keeps_occupied_room() {
        let registry = registry();
        let t1 = ConversationId::new("T1");
        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .join(&t1, Uuid::new_v4(), &SubjectId::new("U1"), tx)
            .await
            .unwrap();

        let result = registry.publish(&t1, &SubjectId::new("U2"), "hi").await;
        assert_eq!(result, Err(ChatError::Forbidden));
        assert_eq!(registry.room_state(&t1).await.unwrap().subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_reaper_keeps_occupied_rooms() {
        let registry = registry();
        let t1 = ConversationId::new("T1");
        let connection_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry
            .join(&t1, connection_id, &SubjectId::new("U1"), tx)
            .await
            .unwrap();
        assert_eq!(registry.reap_empty().await, 0);
        assert_eq!(registry.room_state(&t1).await.unwrap().subscriber_count, 1);

        assert!(registry.leave(&t1, connection_id).await);
        assert_eq!(registry.reap_empty().await, 1);
        assert_eq!(registry.active_rooms().await, 0);
        assert!(!registry.leave(&t1, connection_id).await);
    }

    #[tokio::test]
    async fn test_publish_after_reap_respawns_room() {
        let registry = registry();
        let t1 = ConversationId::new("T1");

        registry
            .publish(&t1, &SubjectId::new("U1"), "one")
            .await
            .unwrap();
        assert_eq!(registry.reap_empty().await, 1);

        let message = registry
            .publish(&t1, &SubjectId::new("D1"), "two")
            .await
            .unwrap();
        assert_eq!(message.text, "two");
        assert_eq!(registry.active_rooms().await, 1);
    }

    #[tokio::test]
    async fn test_stale_handle_is_replaced() {
        let registry = registry();
        let t1 = ConversationId::new("T1");

        registry
            .publish(&t1, &SubjectId::new("U1"), "one")
            .await
            .unwrap();
        // Stop the room behind the registry's back; the map still holds the
        // handle.
        let stale = registry.rooms.lock().await.get(&t1).cloned().unwrap();
        assert!(stale.stop_if_empty().await.unwrap());

        let (tx, _rx) = mpsc::unbounded_channel();
        let history = registry
            .join(&t1, Uuid::new_v4(), &SubjectId::new("U1"), tx)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);

        let current = registry.rooms.lock().await.get(&t1).cloned().unwrap();
        assert_ne!(current.generation(), stale.generation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_runs_on_interval() {
        let registry = registry();
        let cancel = CancellationToken::new();
        registry
            .publish(&ConversationId::new("T1"), &SubjectId::new("U1"), "hi")
            .await
            .unwrap();

        let reaper = spawn_reaper(registry.clone(), Duration::from_secs(60), cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.active_rooms().await, 0);

        cancel.cancel();
        reaper.await.unwrap();
    }
}
