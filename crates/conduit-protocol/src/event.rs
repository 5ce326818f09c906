//! Bridge → client event envelope.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::WireError;

/// Event type discriminator. Serialized as the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Status,
    Qr,
    Error,
    Response,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Status => "status",
            EventKind::Qr => "qr",
            EventKind::Error => "error",
            EventKind::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, account_id: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            version: crate::command::PROTOCOL_VERSION,
            event_type: kind.as_str().to_string(),
            ts: Utc::now(),
            account_id: account_id.into(),
            request_id: None,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_request_id_opt(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Build an `error` event from a [`WireError`], optionally correlated to
    /// the request that triggered it.
    pub fn error(account_id: impl Into<String>, err: WireError, request_id: Option<String>) -> Self {
        let mut ev = Self::new(EventKind::Error, account_id, err);
        ev.request_id = request_id;
        ev
    }

    /// Build a `response` event acknowledging a successfully dispatched
    /// command.
    pub fn response(
        account_id: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Serialize,
    ) -> Self {
        Self::new(EventKind::Response, account_id, payload).with_request_id(request_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthPayload {
    pub version: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: u32,
    #[serde(rename = "bridgeVersion")]
    pub bridge_version: String,
    #[serde(rename = "buildId")]
    pub build_id: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub whatsapp: WhatsAppHealth,
    pub queue: QueueHealth,
    pub dedupe: DedupeHealth,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct WhatsAppHealth {
    pub connected: bool,
    pub running: bool,
    #[serde(rename = "reconnectAttempts")]
    pub reconnect_attempts: u32,
    #[serde(rename = "lastDisconnectStatus", skip_serializing_if = "Option::is_none")]
    pub last_disconnect_status: Option<String>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "lastMessageAt", skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "droppedInboundDuplicates")]
    pub dropped_inbound_duplicates: u64,
    #[serde(rename = "dedupeCacheSize")]
    pub dedupe_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueHealth {
    pub clients: usize,
    pub inflight: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DedupeHealth {
    #[serde(rename = "droppedInboundDuplicates")]
    pub dropped_inbound_duplicates: u64,
    #[serde(rename = "dedupeCacheSize")]
    pub dedupe_cache_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_serializes_type_and_version() {
        let ev = EventEnvelope::new(EventKind::Status, "acct-1", serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""version":2"#));
        assert!(json.contains(r#""accountId":"acct-1""#));
    }

    #[test]
    fn error_event_omits_request_id_when_absent() {
        let err = crate::error::ProtocolError::Auth.to_wire("secret");
        let ev = EventEnvelope::error("acct-1", err, None);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("requestId"));
        assert!(json.contains(r#""code":"ERR_AUTH""#));
    }
}
