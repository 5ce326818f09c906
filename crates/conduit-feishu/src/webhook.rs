//! Webhook receiver for Feishu's event callback API
//! (`im.message.receive_v1`), plus the one-time URL verification handshake
//! Feishu performs when an event subscription URL is first configured.
//!
//! TODO: encrypted event payloads (`encrypt_key` configured) are not
//! decrypted yet — only the plaintext event schema is handled.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::warn;

use conduit_channels::InboundQueue;
use conduit_core::media::persist_media;
use conduit_core::types::{ChannelTag, ContentBlock, Identity, Message as CoreMessage, ReplyRef};

use crate::token::TokenCache;

pub struct WebhookState {
    pub queue: Arc<InboundQueue>,
    pub verification_token: Option<String>,
    pub tokens: Arc<TokenCache>,
    pub http_client: reqwest::Client,
    pub media_root: PathBuf,
    pub max_attachment_bytes: u64,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new().route("/feishu/event", post(handle_event)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct UrlVerification {
    #[serde(rename = "type")]
    kind: String,
    challenge: Option<String>,
    token: Option<String>,
}

fn token_matches(presented: &str, expected: &str) -> bool {
    let (p, e) = (presented.as_bytes(), expected.as_bytes());
    p.len() == e.len() && p.ct_eq(e).into()
}

async fn handle_event(State(state): State<Arc<WebhookState>>, body: String) -> Json<Value> {
    if let Ok(probe) = serde_json::from_str::<UrlVerification>(&body) {
        if probe.kind == "url_verification" {
            if let Some(challenge) = probe.challenge {
                return Json(json!({"challenge": challenge}));
            }
        }
    }

    let envelope: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "feishu: malformed event payload");
            return Json(json!({}));
        }
    };

    let header_token = envelope.pointer("/header/token").and_then(Value::as_str);
    if let (Some(expected), Some(presented)) = (state.verification_token.as_deref(), header_token) {
        if !token_matches(presented, expected) {
            warn!("feishu: webhook token mismatch, dropping event");
            return Json(json!({}));
        }
    }

    let event_type = envelope.pointer("/header/event_type").and_then(Value::as_str).unwrap_or_default();
    if event_type != "im.message.receive_v1" {
        return Json(json!({}));
    }

    if let Some(core_msg) = to_core_message(&envelope, &state).await {
        state.queue.publish(core_msg).await;
    }

    Json(json!({}))
}

async fn to_core_message(envelope: &Value, state: &WebhookState) -> Option<CoreMessage> {
    let event = envelope.get("event")?;
    let message = event.get("message")?;
    let sender = event.get("sender")?;

    let message_id = message.get("message_id")?.as_str()?.to_string();
    let chat_id = message.get("chat_id")?.as_str()?.to_string();
    let chat_type = message.get("chat_type").and_then(Value::as_str).unwrap_or("p2p");
    let message_type = message.get("message_type").and_then(Value::as_str).unwrap_or("text");
    let create_time_ms: i64 = message.get("create_time").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0);
    let timestamp = chrono::DateTime::from_timestamp_millis(create_time_ms).unwrap_or_else(chrono::Utc::now);

    let content_raw: Value = message.get("content").and_then(Value::as_str).and_then(|s| serde_json::from_str(s).ok()).unwrap_or(Value::Null);

    let mut content = Vec::new();
    match message_type {
        "text" => {
            if let Some(text) = content_raw.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    content.push(ContentBlock::text(text));
                }
            }
        }
        "image" => {
            if let Some(key) = content_raw.get("image_key").and_then(Value::as_str) {
                if let Some(block) = download_resource(state, &message_id, key, "image").await {
                    content.push(block);
                }
            }
        }
        "file" => {
            if let Some(key) = content_raw.get("file_key").and_then(Value::as_str) {
                if let Some(block) = download_resource(state, &message_id, key, "file").await {
                    content.push(block);
                }
            }
        }
        other => {
            warn!(message_type = other, "feishu: unsupported message type, dropping");
        }
    }
    if content.is_empty() {
        return None;
    }

    let is_group = chat_type == "group";
    let mentions_empty = message.get("mentions").and_then(Value::as_array).map(|a| a.is_empty()).unwrap_or(true);
    let mentioned_bot = is_group && !mentions_empty;

    let sender_id = sender.pointer("/sender_id/open_id").and_then(Value::as_str).unwrap_or("unknown").to_string();

    let reply_to = message.get("parent_id").and_then(Value::as_str).map(|id| ReplyRef {
        message_id: id.into(),
        text: None,
        sender: None,
    });

    Some(CoreMessage {
        id: message_id.into(),
        channel: ChannelTag::from("feishu"),
        chat_id: chat_id.into(),
        sender: Identity::new(sender_id),
        content,
        reply_to,
        timestamp,
        is_group,
        mentioned_bot,
        reply_to_bot: false,
        participant: None,
        metadata: Default::default(),
    })
}

async fn download_resource(state: &WebhookState, message_id: &str, key: &str, resource_type: &str) -> Option<ContentBlock> {
    let token = state.tokens.get(&state.http_client).await.ok()?;
    let url = format!("https://open.feishu.cn/open-apis/im/v1/messages/{message_id}/resources/{key}?type={resource_type}");
    let resp = state.http_client.get(&url).bearer_auth(token).send().await.ok()?;

    let mime_type = resp.headers().get("content-type").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    let bytes = resp.bytes().await.ok()?;
    if bytes.len() as u64 > state.max_attachment_bytes {
        warn!(key, size = bytes.len(), "feishu: resource exceeds size limit, skipping");
        return None;
    }

    let kind = if resource_type == "image" { conduit_core::types::ContentKind::Image } else { conduit_core::types::ContentKind::File };
    let path = persist_media(&state.media_root, "feishu", chrono::Utc::now(), key, &bytes).ok()?;

    Some(ContentBlock {
        kind,
        text: None,
        path: Some(path.display().to_string()),
        mime_type,
        size_bytes: Some(bytes.len() as u64),
        transcript: None,
        description: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_matches_equal_strings() {
        assert!(token_matches("abc", "abc"));
    }

    #[test]
    fn token_matches_rejects_mismatch() {
        assert!(!token_matches("abc", "abd"));
        assert!(!token_matches("abc", "abcd"));
    }
}
