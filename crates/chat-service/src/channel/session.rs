//! One task per accepted channel connection.
//!
//! The connection identity is fixed at handshake. Every outbound frame,
//! including room broadcasts, goes through one unbounded queue drained by this
//! task, so a connection sees its own replies and broadcasts in the order
//! they were produced.

use super::protocol::{ClientFrame, ServerFrame};
use crate::actors::RoomRegistry;
use crate::auth::{Authenticated, ChannelAuthenticator};
use crate::errors::ChatError;
use crate::observability::metrics;
use crate::services::MessageService;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use common::types::ConversationId;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct ChannelSession {
    connection_id: Uuid,
    authenticated: Authenticated,
    authenticator: Arc<ChannelAuthenticator>,
    rooms: Arc<RoomRegistry>,
    messages: Arc<MessageService>,
    reverify_interval: Option<Duration>,
    cancel_token: CancellationToken,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    outbound_rx: mpsc::UnboundedReceiver<ServerFrame>,
    joined: HashSet<ConversationId>,
}

impl ChannelSession {
    pub fn new(
        authenticated: Authenticated,
        authenticator: Arc<ChannelAuthenticator>,
        rooms: Arc<RoomRegistry>,
        messages: Arc<MessageService>,
        reverify_interval: Option<Duration>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            connection_id: Uuid::new_v4(),
            authenticated,
            authenticator,
            rooms,
            messages,
            reverify_interval,
            cancel_token,
            outbound,
            outbound_rx,
            joined: HashSet::new(),
        }
    }

    #[instrument(
        skip_all,
        name = "chat.channel",
        fields(connection_id = %self.connection_id, subject_id = %self.authenticated.identity.subject_id)
    )]
    pub async fn run(mut self, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        metrics::channel_connected();
        info!(target: "chat.channel", "Channel connected");

        self.queue(ServerFrame::Ready {
            subject_id: self.authenticated.identity.subject_id.clone(),
        });

        let mut reverify = self
            .reverify_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "chat.channel", "Shutting down channel");
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }

                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(WsMessage::Binary(_))) => {
                            self.queue(ServerFrame::error(
                                &ChatError::BadRequest("Binary frames are not supported".to_string()),
                                None,
                            ));
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!(target: "chat.channel", "Client closed connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "chat.channel", error = %e, "WebSocket receive failed");
                            break;
                        }
                    }
                }

                Some(frame) = self.outbound_rx.recv() => {
                    if !send_frame(&mut ws_tx, &frame).await {
                        break;
                    }
                }

                () = next_tick(&mut reverify) => {
                    if let Err(e) = self.authenticator.reverify(&self.authenticated).await {
                        info!(target: "chat.channel", code = e.frame_code(), "Channel credential no longer valid, closing");
                        send_frame(&mut ws_tx, &ServerFrame::error(&e, None)).await;
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }

        self.leave_all().await;
        metrics::channel_disconnected();
        info!(target: "chat.channel", "Channel disconnected");
    }

    async fn handle_text(&mut self, text: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(target: "chat.channel", error = %e, "Unrecognized client frame");
                self.queue(ServerFrame::error(
                    &ChatError::BadRequest("Unrecognized frame".to_string()),
                    None,
                ));
                return;
            }
        };

        match frame {
            ClientFrame::Join { conversation_id } => self.handle_join(conversation_id).await,
            ClientFrame::Leave { conversation_id } => {
                if self.joined.remove(&conversation_id) {
                    self.rooms.leave(&conversation_id, self.connection_id).await;
                }
                self.queue(ServerFrame::Left { conversation_id });
            }
            ClientFrame::Send {
                conversation_id,
                text,
            } => self.handle_send(conversation_id, &text).await,
            ClientFrame::History { conversation_id } => {
                let subject_id = &self.authenticated.identity.subject_id;
                match self.messages.list_messages(&conversation_id, subject_id).await {
                    Ok(messages) => self.queue(ServerFrame::History {
                        conversation_id,
                        messages,
                    }),
                    Err(e) => self.queue(ServerFrame::error(&e, Some(conversation_id))),
                }
            }
            ClientFrame::Ping => self.queue(ServerFrame::Pong),
        }
    }

    async fn handle_join(&mut self, conversation_id: ConversationId) {
        let result = self
            .rooms
            .join(
                &conversation_id,
                self.connection_id,
                &self.authenticated.identity.subject_id,
                self.outbound.clone(),
            )
            .await;

        match result {
            Ok(messages) => {
                self.joined.insert(conversation_id.clone());
                self.queue(ServerFrame::Joined {
                    conversation_id,
                    messages,
                });
            }
            Err(e) => {
                debug!(target: "chat.channel", conversation_id = %conversation_id, code = e.frame_code(), "Join refused");
                self.queue(ServerFrame::error(&e, Some(conversation_id)));
            }
        }
    }

    async fn handle_send(&mut self, conversation_id: ConversationId, text: &str) {
        if !self.joined.contains(&conversation_id) {
            self.queue(ServerFrame::error(
                &ChatError::BadRequest("Join the conversation before sending".to_string()),
                Some(conversation_id),
            ));
            return;
        }

        let result = self
            .rooms
            .publish(
                &conversation_id,
                &self.authenticated.identity.subject_id,
                text,
            )
            .await;

        match result {
            // The sender receives its own message through the room broadcast.
            Ok(_) => metrics::record_message_posted("channel"),
            Err(e) => {
                if matches!(e, ChatError::Forbidden | ChatError::NotFound) {
                    self.joined.remove(&conversation_id);
                    self.rooms.leave(&conversation_id, self.connection_id).await;
                }
                self.queue(ServerFrame::error(&e, Some(conversation_id)));
            }
        }
    }

    async fn leave_all(&mut self) {
        for conversation_id in self.joined.drain() {
            self.rooms.leave(&conversation_id, self.connection_id).await;
        }
    }

    fn queue(&self, frame: ServerFrame) {
        // The receiver lives in `self`, so this only fails during teardown.
        let _ = self.outbound.send(frame);
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Returns false if the socket is gone.
async fn send_frame(ws_tx: &mut SplitSink<WebSocket, WsMessage>, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "chat.channel", error = %e, "Failed to encode frame");
            return true;
        }
    };
    match ws_tx.send(WsMessage::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(target: "chat.channel", error = %e, "WebSocket send failed");
            false
        }
    }
}
