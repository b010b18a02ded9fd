//! Channel wire protocol.
//!
//! JSON text frames tagged by `type`, with camelCase fields:
//!
//! ```text
//! client -> server   join | leave | send | history | ping
//! server -> client   ready | joined | left | message | history | pong | error
//! ```

use crate::errors::ChatError;
use crate::repositories::Message;
use common::types::{ConversationId, SubjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Join {
        conversation_id: ConversationId,
    },
    Leave {
        conversation_id: ConversationId,
    },
    /// Only accepted after a `join` of the same conversation on this connection.
    Send {
        conversation_id: ConversationId,
        text: String,
    },
    History {
        conversation_id: ConversationId,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// First frame on every accepted connection.
    Ready {
        subject_id: SubjectId,
    },
    Joined {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    Left {
        conversation_id: ConversationId,
    },
    Message {
        message: Message,
    },
    History {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    Pong,
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
}

impl ServerFrame {
    pub fn error(err: &ChatError, conversation_id: Option<ConversationId>) -> Self {
        ServerFrame::Error {
            code: err.frame_code().to_string(),
            message: err.client_message(),
            conversation_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"send","conversationId":"T1","text":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Send {
                conversation_id: ConversationId::new("T1"),
                text: "hi".to_string()
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn test_malformed_client_frames_rejected() {
        for raw in [
            r#"{"type":"join"}"#,
            r#"{"type":"shout","conversationId":"T1"}"#,
            r#"{"conversationId":"T1"}"#,
            "not json",
        ] {
            assert!(serde_json::from_str::<ClientFrame>(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn test_error_frame_shape() {
        let json = serde_json::to_value(ServerFrame::error(
            &ChatError::Forbidden,
            Some(ConversationId::new("T1")),
        ))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "forbidden");
        assert_eq!(json["conversationId"], "T1");

        let json = serde_json::to_value(ServerFrame::error(
            &ChatError::BadRequest("Unrecognized frame".to_string()),
            None,
        ))
        .unwrap();
        assert_eq!(json["code"], "bad_request");
        assert!(json.get("conversationId").is_none());
    }

    #[test]
    fn test_ready_and_pong_shape() {
        let json = serde_json::to_value(ServerFrame::Ready {
            subject_id: SubjectId::new("U1"),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "ready", "subjectId": "U1"}));
        assert_eq!(
            serde_json::to_value(ServerFrame::Pong).unwrap(),
            serde_json::json!({"type": "pong"})
        );
    }
}
