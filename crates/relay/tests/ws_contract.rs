use civica_common::protocol::ws::WsMessage;
use serde_json::Value;
use uuid::Uuid;

const RELAY_WS_SOURCE: &str = include_str!("../src/ws/mod.rs");
const RELAY_PRESENCE_SOURCE: &str = include_str!("../src/presence.rs");
const RELAY_VALIDATION_SOURCE: &str = include_str!("../src/validation.rs");

#[test]
fn websocket_contract_heartbeat_and_auth_timeout() {
    let auth_timeout_ms = parse_u64_const(RELAY_WS_SOURCE, "AUTH_TIMEOUT_MS");
    let heartbeat_interval_ms = parse_u64_const(RELAY_WS_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(RELAY_WS_SOURCE, "HEARTBEAT_TIMEOUT_MS");

    assert_eq!(auth_timeout_ms, 5_000);
    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_typing_expiry_windows() {
    let typing_ttl_ms = parse_u64_const(RELAY_PRESENCE_SOURCE, "TYPING_TTL_MS");
    let sweep_interval_ms = parse_u64_const(RELAY_PRESENCE_SOURCE, "SWEEP_INTERVAL_MS");

    assert_eq!(typing_ttl_ms, 2_500);
    assert_eq!(sweep_interval_ms, 500);
    assert!(
        sweep_interval_ms < typing_ttl_ms,
        "expiry sweep must run more often than the typing TTL",
    );
    assert!(
        typing_ttl_ms + sweep_interval_ms <= 3_000,
        "a lapsed typing indicator must be swept within 3 seconds of the last refresh",
    );
}

#[test]
fn websocket_contract_frame_size_limit_is_64_kib() {
    assert!(
        RELAY_VALIDATION_SOURCE.contains("pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024"),
        "websocket frame limit must stay at 64 KiB",
    );
    assert!(RELAY_WS_SOURCE.contains("max_frame_size(MAX_WS_FRAME_BYTES)"));
}

#[test]
fn websocket_contract_message_shapes() {
    let report_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let samples = [
        (
            WsMessage::Hello { token: "access-token".to_string() },
            "hello",
            &["type", "token"][..],
        ),
        (
            WsMessage::HelloAck { server_time: "2026-08-30T00:00:00Z".to_string() },
            "hello_ack",
            &["type", "server_time"][..],
        ),
        (WsMessage::JoinReport { report_id }, "join_report", &["type", "report_id"][..]),
        (WsMessage::JoinedReport { report_id }, "joined_report", &["type", "report_id"][..]),
        (WsMessage::LeaveReport { report_id }, "leave_report", &["type", "report_id"][..]),
        (WsMessage::Typing { report_id }, "typing", &["type", "report_id"][..]),
        (WsMessage::StopTyping { report_id }, "stop_typing", &["type", "report_id"][..]),
        (
            WsMessage::UserTyping { report_id, user_id, user_name: "Ada".to_string() },
            "user_typing",
            &["type", "report_id", "user_id", "user_name"][..],
        ),
        (
            WsMessage::UserStopTyping { report_id, user_id },
            "user_stop_typing",
            &["type", "report_id", "user_id"][..],
        ),
        (
            WsMessage::MarkFeedbackRead { report_id },
            "mark_feedback_read",
            &["type", "report_id"][..],
        ),
        (
            WsMessage::FeedbackMarkedRead { report_id },
            "feedback_marked_read",
            &["type", "report_id"][..],
        ),
        (
            WsMessage::Error {
                code: "AUTH_INVALID_TOKEN".to_string(),
                message: "invalid token".to_string(),
                retryable: false,
                report_id: Some(report_id),
            },
            "error",
            &["type", "code", "message", "retryable", "report_id"][..],
        ),
    ];

    for (message, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(message).expect("ws message should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn websocket_contract_optional_fields_are_omitted_when_absent() {
    let error_without_report = WsMessage::Error {
        code: "AUTH_INVALID_TOKEN".to_string(),
        message: "invalid token".to_string(),
        retryable: false,
        report_id: None,
    };

    let error_json = serde_json::to_value(error_without_report).expect("error should serialize");
    assert!(!object_keys(&error_json).contains(&"report_id".to_string()));
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
