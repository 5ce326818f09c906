//! Client → bridge command envelope.
//!
//! The wire payload is an open-ended JSON object whose shape depends on
//! `type`; per the "dynamic payloads → tagged variants" design note, parsing
//! happens in two steps: first the fixed envelope fields, then a
//! command-specific payload decoded from the nested `payload` value. This
//! mirrors `InboundFrame::as_req()`'s discriminator-then-body approach, just
//! without needing `serde(flatten)` since `payload` is already its own key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseResult, ProtocolError};

pub const PROTOCOL_VERSION: u32 = conduit_core::config::BRIDGE_PROTOCOL_VERSION;

/// Raw command envelope as received off the socket, before payload dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandEnvelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub command_type: String,
    pub token: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "accountId", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// A fully parsed, payload-validated command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendText(SendTextPayload),
    SendMedia(SendMediaPayload),
    SendPoll(SendPollPayload),
    React(ReactPayload),
    PresenceUpdate(PresenceUpdatePayload),
    ListGroups(ListGroupsPayload),
    LoginStart(LoginStartPayload),
    LoginWait(LoginWaitPayload),
    Logout,
    Health,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendTextPayload {
    pub to: String,
    pub text: String,
    #[serde(rename = "replyToMessageId", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

impl SendTextPayload {
    fn validate(&self) -> ParseResult<()> {
        if self.to.trim().is_empty() {
            return Err(ProtocolError::Schema("send_text.to must be non-empty".into()));
        }
        if self.text.is_empty() {
            return Err(ProtocolError::Schema("send_text.text must be non-empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMediaPayload {
    pub to: String,
    #[serde(rename = "mediaUrl", default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(rename = "mediaBase64", default, skip_serializing_if = "Option::is_none")]
    pub media_base64: Option<String>,
    #[serde(rename = "mediaPath", default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(rename = "replyToMessageId", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

impl SendMediaPayload {
    fn validate(&self) -> ParseResult<()> {
        if self.to.trim().is_empty() {
            return Err(ProtocolError::Schema("send_media.to must be non-empty".into()));
        }
        let sources = [&self.media_url, &self.media_base64, &self.media_path]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources != 1 {
            return Err(ProtocolError::Schema(
                "send_media requires exactly one of mediaUrl, mediaBase64, mediaPath".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPollPayload {
    pub to: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "maxSelections", default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
}

impl SendPollPayload {
    fn validate(&self) -> ParseResult<()> {
        if self.to.trim().is_empty() {
            return Err(ProtocolError::Schema("send_poll.to must be non-empty".into()));
        }
        if self.options.len() < 2 || self.options.len() > 12 {
            return Err(ProtocolError::Schema(
                "send_poll.options must contain between 2 and 12 entries".into(),
            ));
        }
        if let Some(max) = self.max_selections {
            if max < 1 || max > 12 {
                return Err(ProtocolError::Schema(
                    "send_poll.maxSelections must be between 1 and 12".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactPayload {
    #[serde(rename = "chatJid")]
    pub chat_jid: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub emoji: String,
    #[serde(rename = "participantJid", default, skip_serializing_if = "Option::is_none")]
    pub participant_jid: Option<String>,
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Available,
    Unavailable,
    Composing,
    Paused,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    pub state: PresenceState,
    #[serde(rename = "chatJid", default, skip_serializing_if = "Option::is_none")]
    pub chat_jid: Option<String>,
}

impl PresenceUpdatePayload {
    fn validate(&self) -> ParseResult<()> {
        let needs_chat = matches!(
            self.state,
            PresenceState::Composing | PresenceState::Paused | PresenceState::Recording
        );
        if needs_chat && self.chat_jid.is_none() {
            return Err(ProtocolError::Schema(
                "presence_update requires chatJid for composing/paused/recording".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListGroupsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginStartPayload {
    #[serde(default)]
    pub force: bool,
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LoginStartPayload {
    fn validate(&self) -> ParseResult<()> {
        validate_timeout(self.timeout_ms, "login_start")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginWaitPayload {
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LoginWaitPayload {
    fn validate(&self) -> ParseResult<()> {
        validate_timeout(self.timeout_ms, "login_wait")
    }
}

fn validate_timeout(timeout_ms: Option<u64>, command: &str) -> ParseResult<()> {
    if let Some(ms) = timeout_ms {
        if ms < 1000 {
            return Err(ProtocolError::Schema(format!(
                "{command}.timeoutMs must be >= 1000"
            )));
        }
    }
    Ok(())
}

fn decode_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> ParseResult<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ProtocolError::Schema(format!("invalid payload: {e}")))
}

/// Parse a raw envelope into a validated [`Command`]. Authentication is
/// deliberately not checked here — token comparison happens once, in
/// `conduit-protocol::auth`, against the envelope's `token` field, before
/// this function is ever called, so a malformed-but-unauthenticated command
/// never leaks schema detail to an unauthenticated caller beyond `ERR_AUTH`.
pub fn parse_command(envelope: &CommandEnvelope) -> ParseResult<Command> {
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtocolError::ProtocolVersion(envelope.version));
    }
    let command = match envelope.command_type.as_str() {
        "send_text" => {
            let p: SendTextPayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::SendText(p)
        }
        "send_media" => {
            let p: SendMediaPayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::SendMedia(p)
        }
        "send_poll" => {
            let p: SendPollPayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::SendPoll(p)
        }
        "react" => Command::React(decode_payload(&envelope.payload)?),
        "presence_update" => {
            let p: PresenceUpdatePayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::PresenceUpdate(p)
        }
        "list_groups" => Command::ListGroups(decode_payload(&envelope.payload)?),
        "login_start" => {
            let p: LoginStartPayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::LoginStart(p)
        }
        "login_wait" => {
            let p: LoginWaitPayload = decode_payload(&envelope.payload)?;
            p.validate()?;
            Command::LoginWait(p)
        }
        "logout" => Command::Logout,
        "health" => Command::Health,
        other => return Err(ProtocolError::Unsupported(other.to_string())),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(command_type: &str, payload: Value) -> CommandEnvelope {
        CommandEnvelope {
            version: PROTOCOL_VERSION,
            command_type: command_type.to_string(),
            token: "tok".to_string(),
            request_id: None,
            account_id: None,
            payload,
        }
    }

    #[test]
    fn send_text_parses_and_validates() {
        let env = envelope("send_text", serde_json::json!({"to": "123", "text": "hi"}));
        let cmd = parse_command(&env).unwrap();
        assert_eq!(
            cmd,
            Command::SendText(SendTextPayload {
                to: "123".into(),
                text: "hi".into(),
                reply_to_message_id: None,
            })
        );
    }

    #[test]
    fn send_text_rejects_empty_text() {
        let env = envelope("send_text", serde_json::json!({"to": "123", "text": ""}));
        assert!(parse_command(&env).is_err());
    }

    #[test]
    fn send_media_requires_exactly_one_source() {
        let none = envelope("send_media", serde_json::json!({"to": "123"}));
        assert!(parse_command(&none).is_err());

        let two = envelope(
            "send_media",
            serde_json::json!({"to": "123", "mediaUrl": "http://x", "mediaPath": "/tmp/x"}),
        );
        assert!(parse_command(&two).is_err());

        let one = envelope("send_media", serde_json::json!({"to": "123", "mediaUrl": "http://x"}));
        assert!(parse_command(&one).is_ok());
    }

    #[test]
    fn send_poll_enforces_option_bounds() {
        let too_few = envelope(
            "send_poll",
            serde_json::json!({"to": "1", "question": "q", "options": ["a"]}),
        );
        assert!(parse_command(&too_few).is_err());

        let ok = envelope(
            "send_poll",
            serde_json::json!({"to": "1", "question": "q", "options": ["a", "b"]}),
        );
        assert!(parse_command(&ok).is_ok());
    }

    #[test]
    fn presence_update_requires_chat_jid_for_composing() {
        let missing = envelope("presence_update", serde_json::json!({"state": "composing"}));
        assert!(parse_command(&missing).is_err());

        let present = envelope(
            "presence_update",
            serde_json::json!({"state": "composing", "chatJid": "123@g.us"}),
        );
        assert!(parse_command(&present).is_ok());

        let available = envelope("presence_update", serde_json::json!({"state": "available"}));
        assert!(parse_command(&available).is_ok());
    }

    #[test]
    fn unsupported_command_type_is_rejected() {
        let env = envelope("delete_everything", serde_json::json!({}));
        assert!(matches!(
            parse_command(&env),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn wrong_protocol_version_is_rejected() {
        let mut env = envelope("health", serde_json::json!({}));
        env.version = 99;
        assert!(matches!(
            parse_command(&env),
            Err(ProtocolError::ProtocolVersion(99))
        ));
    }

    #[test]
    fn login_start_rejects_short_timeout() {
        let env = envelope("login_start", serde_json::json!({"timeoutMs": 500}));
        assert!(parse_command(&env).is_err());
    }
}
