// WebSocket message types for the civica-feedback.v1 protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::FeedbackMessage;

/// Protocol identifier clients and server must agree on.
pub const PROTOCOL_NAME: &str = "civica-feedback.v1";

/// All message types in the civica-feedback.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake; must be the first frame.
    Hello {
        token: String,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck {
        server_time: String,
    },

    /// Client -> Server: join a report's feedback room.
    JoinReport {
        report_id: Uuid,
    },

    /// Server -> Client: join confirmation, sent to the caller only.
    JoinedReport {
        report_id: Uuid,
    },

    /// Client -> Server: leave a report's feedback room.
    LeaveReport {
        report_id: Uuid,
    },

    /// Server -> Client: a feedback message was persisted by another
    /// participant. A cache-invalidation hint, never authoritative content:
    /// clients re-fetch the full ordered log over REST on receipt.
    NewFeedback {
        report_id: Uuid,
        feedback: FeedbackMessage,
    },

    /// Client -> Server: the user started (or continues) typing.
    Typing {
        report_id: Uuid,
    },

    /// Client -> Server: the user explicitly stopped typing.
    StopTyping {
        report_id: Uuid,
    },

    /// Server -> Client: another participant is typing.
    UserTyping {
        report_id: Uuid,
        user_id: Uuid,
        user_name: String,
    },

    /// Server -> Client: a participant stopped typing (explicitly, on
    /// disconnect, or via expiry).
    UserStopTyping {
        report_id: Uuid,
        user_id: Uuid,
    },

    /// Client -> Server: mark all prior feedback in the report as read.
    MarkFeedbackRead {
        report_id: Uuid,
    },

    /// Server -> Client: read-mark acknowledgement, sent to the caller only.
    FeedbackMarkedRead {
        report_id: Uuid,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        report_id: Option<Uuid>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;

    #[test]
    fn frames_are_tagged_with_snake_case_type() {
        let report_id = Uuid::new_v4();
        let join = serde_json::to_value(WsMessage::JoinReport { report_id }).unwrap();
        assert_eq!(join["type"], "join_report");
        assert_eq!(join["report_id"], report_id.to_string());

        let stop = serde_json::to_value(WsMessage::UserStopTyping {
            report_id,
            user_id: Uuid::new_v4(),
        })
        .unwrap();
        assert_eq!(stop["type"], "user_stop_typing");
    }

    #[test]
    fn new_feedback_embeds_the_full_message() {
        let report_id = Uuid::new_v4();
        let frame = WsMessage::NewFeedback {
            report_id,
            feedback: FeedbackMessage {
                id: Uuid::new_v4(),
                report_id,
                sender_id: Uuid::new_v4(),
                sender_name: "Admin B".into(),
                sender_role: Role::Admin,
                body: "Crew dispatched".into(),
                attachments: vec![],
                created_at: Utc::now(),
                read_by: vec![],
            },
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "new_feedback");
        assert_eq!(value["feedback"]["message"], serde_json::Value::Null);
        assert_eq!(value["feedback"]["body"], "Crew dispatched");

        let parsed: WsMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn error_frame_omits_report_id_when_absent() {
        let value = serde_json::to_value(WsMessage::Error {
            code: "AUTH_INVALID_TOKEN".into(),
            message: "invalid token".into(),
            retryable: false,
            report_id: None,
        })
        .unwrap();

        assert!(value.get("report_id").is_none());
    }

    #[test]
    fn unknown_frame_type_fails_to_parse() {
        let result: Result<WsMessage, _> =
            serde_json::from_str(r#"{"type":"send_feedback","report_id":"not-even-a-uuid"}"#);
        assert!(result.is_err());
    }
}
