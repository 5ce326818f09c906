// Verify the bridge wire format matches what the WhatsApp session client expects.
// These tests ensure protocol compatibility is never broken.

use conduit_protocol::command::{Command, CommandEnvelope, SendTextPayload};
use conduit_protocol::event::{EventEnvelope, EventKind};
use conduit_protocol::{parse_command, ProtocolError};

#[test]
fn command_envelope_round_trip() {
    let json = r#"{"version":2,"type":"send_text","token":"tok","requestId":"r1","payload":{"to":"123","text":"hello"}}"#;
    let env: CommandEnvelope = serde_json::from_str(json).unwrap();
    assert_eq!(env.command_type, "send_text");
    assert_eq!(env.request_id.as_deref(), Some("r1"));

    let cmd = parse_command(&env).unwrap();
    assert_eq!(
        cmd,
        Command::SendText(SendTextPayload {
            to: "123".into(),
            text: "hello".into(),
            reply_to_message_id: None,
        })
    );
}

#[test]
fn response_event_serialization() {
    let ev = EventEnvelope::response("acct-1", "r1", serde_json::json!({"sent": true}));
    let json = serde_json::to_string(&ev).unwrap();

    assert!(json.contains(r#""type":"response""#));
    assert!(json.contains(r#""requestId":"r1""#));
    assert!(json.contains(r#""sent":true"#));
}

#[test]
fn error_event_sanitizes_token_in_message() {
    let err = ProtocolError::Schema("token super-secret is invalid".into()).to_wire("super-secret");
    let ev = EventEnvelope::error("acct-1", err, Some("r2".into()));
    let json = serde_json::to_string(&ev).unwrap();

    assert!(json.contains(r#""type":"error""#));
    assert!(json.contains(r#""code":"ERR_SCHEMA""#));
    assert!(!json.contains("super-secret"));
    assert!(json.contains("***"));
}

#[test]
fn message_event_has_no_request_id_by_default() {
    let ev = EventEnvelope::new(EventKind::Message, "acct-1", serde_json::json!({"text": "hi"}));
    let json = serde_json::to_string(&ev).unwrap();
    assert!(!json.contains("requestId"));
}

#[test]
fn unsupported_command_type_round_trips_to_err_unsupported() {
    let json = r#"{"version":2,"type":"delete_everything","token":"tok","payload":{}}"#;
    let env: CommandEnvelope = serde_json::from_str(json).unwrap();
    let err = parse_command(&env).unwrap_err();
    assert_eq!(err.code(), "ERR_UNSUPPORTED");
}

#[test]
fn protocol_version_mismatch_round_trips_to_err_protocol_version() {
    let json = r#"{"version":1,"type":"health","token":"tok","payload":{}}"#;
    let env: CommandEnvelope = serde_json::from_str(json).unwrap();
    let err = parse_command(&env).unwrap_err();
    assert_eq!(err.code(), "ERR_PROTOCOL_VERSION");
}

#[test]
fn health_command_has_empty_payload() {
    let json = r#"{"version":2,"type":"health","token":"tok","payload":{}}"#;
    let env: CommandEnvelope = serde_json::from_str(json).unwrap();
    assert_eq!(parse_command(&env).unwrap(), Command::Health);
}
