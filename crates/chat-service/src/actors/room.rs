//! `RoomActor`: one task per active conversation.
//!
//! The actor exclusively owns the subscriber set. It stops when its
//! cancellation token fires, when every handle is dropped, or when asked to
//! stop while empty. A stopped room drops its mailbox, so callers holding a
//! stale handle see [`RoomError::Closed`] rather than a silently lost request.

use super::messages::{RoomMessage, RoomState};
use crate::channel::ServerFrame;
use crate::errors::ChatError;
use crate::repositories::Message;
use crate::services::MessageService;
use common::types::{ConversationId, SubjectId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

const ROOM_CHANNEL_BUFFER: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The actor stopped before handling the request.
    #[error("room {0} is no longer running")]
    Closed(ConversationId),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    conversation_id: ConversationId,
    generation: u64,
}

impl RoomHandle {
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Distinguishes successive actors spawned for the same conversation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        connection_id: Uuid,
        subject_id: SubjectId,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<Vec<Message>, RoomError> {
        Ok(self
            .request(|respond_to| RoomMessage::Join {
                connection_id,
                subject_id,
                sender,
                respond_to,
            })
            .await??)
    }

    pub async fn leave(&self, connection_id: Uuid) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomMessage::Leave {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn publish(&self, subject_id: SubjectId, text: String) -> Result<Message, RoomError> {
        Ok(self
            .request(|respond_to| RoomMessage::Publish {
                subject_id,
                text,
                respond_to,
            })
            .await??)
    }

    pub async fn state(&self) -> Result<RoomState, RoomError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub async fn stop_if_empty(&self) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomMessage::StopIfEmpty { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| RoomError::Closed(self.conversation_id.clone()))?;
        rx.await
            .map_err(|_| RoomError::Closed(self.conversation_id.clone()))
    }
}

struct Subscriber {
    subject_id: SubjectId,
    sender: mpsc::UnboundedSender<ServerFrame>,
}

pub struct RoomActor {
    conversation_id: ConversationId,
    receiver: mpsc::Receiver<RoomMessage>,
    messages: Arc<MessageService>,
    subscribers: HashMap<Uuid, Subscriber>,
    cancel_token: CancellationToken,
    messages_published: u64,
}

impl RoomActor {
    pub fn spawn(
        conversation_id: ConversationId,
        generation: u64,
        messages: Arc<MessageService>,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            conversation_id: conversation_id.clone(),
            receiver,
            messages,
            subscribers: HashMap::new(),
            cancel_token,
            messages_published: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            conversation_id,
            generation,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "chat.room", fields(conversation_id = %self.conversation_id))]
    async fn run(mut self) {
        debug!(target: "chat.room", "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "chat.room", "RoomActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            debug!(target: "chat.room", "RoomActor mailbox closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "chat.room",
            subscribers = self.subscribers.len(),
            messages_published = self.messages_published,
            "RoomActor stopped"
        );
    }

    /// Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                connection_id,
                subject_id,
                sender,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, subject_id, sender).await;
                let _ = respond_to.send(result);
                false
            }

            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let removed = self.subscribers.remove(&connection_id).is_some();
                if removed {
                    debug!(target: "chat.room", connection_id = %connection_id, "Subscriber left");
                }
                let _ = respond_to.send(removed);
                false
            }

            RoomMessage::Publish {
                subject_id,
                text,
                respond_to,
            } => {
                let result = self.handle_publish(&subject_id, &text).await;
                let _ = respond_to.send(result);
                false
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    conversation_id: self.conversation_id.clone(),
                    subscriber_count: self.subscribers.len(),
                    messages_published: self.messages_published,
                });
                false
            }

            RoomMessage::StopIfEmpty { respond_to } => {
                let stop = self.subscribers.is_empty();
                let _ = respond_to.send(stop);
                stop
            }
        }
    }

    async fn handle_join(
        &mut self,
        connection_id: Uuid,
        subject_id: SubjectId,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<Vec<Message>, ChatError> {
        // Authorizes as part of listing.
        let history = self
            .messages
            .list_messages(&self.conversation_id, &subject_id)
            .await?;

        debug!(
            target: "chat.room",
            connection_id = %connection_id,
            subscribers = self.subscribers.len() + 1,
            "Subscriber joined"
        );
        self.subscribers
            .insert(connection_id, Subscriber { subject_id, sender });

        Ok(history)
    }

    async fn handle_publish(
        &mut self,
        subject_id: &SubjectId,
        text: &str,
    ) -> Result<Message, ChatError> {
        let (message, conversation) = self
            .messages
            .post_message_with_members(&self.conversation_id, subject_id, text)
            .await?;
        self.messages_published += 1;

        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        let conversation_id = &self.conversation_id;
        self.subscribers.retain(|connection_id, subscriber| {
            // Membership may have changed since the subscriber joined.
            if !conversation.is_participant(&subscriber.subject_id) {
                debug!(
                    target: "chat.room",
                    connection_id = %connection_id,
                    subject_id = %subscriber.subject_id,
                    "Evicting subscriber no longer in conversation"
                );
                let _ = subscriber.sender.send(ServerFrame::error(
                    &ChatError::Forbidden,
                    Some(conversation_id.clone()),
                ));
                return false;
            }

            let delivered = subscriber.sender.send(frame.clone()).is_ok();
            if !delivered {
                debug!(
                    target: "chat.room",
                    connection_id = %connection_id,
                    subject_id = %subscriber.subject_id,
                    "Dropping closed subscriber"
                );
            }
            delivered
        });

        Ok(message)
    }
}
