//! Mailbox messages for [`RoomActor`](super::RoomActor).

use crate::channel::ServerFrame;
use crate::errors::ChatError;
use crate::repositories::Message;
use common::types::{ConversationId, SubjectId};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug)]
pub enum RoomMessage {
    /// Authorize the subject, load history and subscribe the connection, as
    /// one step.
    Join {
        connection_id: Uuid,
        subject_id: SubjectId,
        sender: mpsc::UnboundedSender<ServerFrame>,
        respond_to: oneshot::Sender<Result<Vec<Message>, ChatError>>,
    },

    /// Unsubscribe a connection. Replies whether it was subscribed.
    Leave {
        connection_id: Uuid,
        respond_to: oneshot::Sender<bool>,
    },

    /// Persist a message, then broadcast it to every subscriber.
    Publish {
        subject_id: SubjectId,
        text: String,
        respond_to: oneshot::Sender<Result<Message, ChatError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },

    /// Stop the actor if nobody is subscribed. Replies whether it stopped.
    StopIfEmpty {
        respond_to: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub conversation_id: ConversationId,
    pub subscriber_count: usize,
    pub messages_published: u64,
}
