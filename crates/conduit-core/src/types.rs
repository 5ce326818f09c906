use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Channel tag: which platform a message came from ("whatsapp", "telegram", "discord", "feishu").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ChannelTag(pub String);

impl ChannelTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelTag {
    fn from(s: &str) -> Self {
        Self(s.to_lowercase())
    }
}

impl From<String> for ChannelTag {
    fn from(s: String) -> Self {
        Self(s.to_lowercase())
    }
}

/// Opaque per-channel chat identifier (DM or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Platform message identifier — unique within a `(channel, chat_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Platform-specific sender identifier, pre-normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SenderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SenderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: SenderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<SenderId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            handle: None,
        }
    }
}

/// What a message is replying to, as reported by the originating platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderId>,
}

/// Kind of an inbound content block. Order within a `Message.content` is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Audio,
    Video,
    Sticker,
    File,
}

/// One unit of inbound content. Most fields are optional because their
/// relevance depends on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// ASR transcript, present for audio/video blocks that were transcribed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// Vision-model description, present for image/video/sticker blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: Some(text.into()),
            path: None,
            mime_type: None,
            size_bytes: None,
            transcript: None,
            description: None,
        }
    }

    /// The best plain-text representation of this block: raw text, else an
    /// ASR transcript, else a vision description, else a kind placeholder.
    pub fn as_plain_text(&self) -> String {
        if let Some(t) = &self.text {
            return t.clone();
        }
        if let Some(t) = &self.transcript {
            return t.clone();
        }
        if let Some(d) = &self.description {
            return d.clone();
        }
        match self.kind {
            ContentKind::Text => String::new(),
            ContentKind::Image => "[Image]".to_string(),
            ContentKind::Audio => "[Voice Message]".to_string(),
            ContentKind::Video => "[Video]".to_string(),
            ContentKind::Sticker => "[Sticker]".to_string(),
            ContentKind::File => "[File]".to_string(),
        }
    }
}

/// Immutable inbound message envelope, as produced by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel: ChannelTag,
    pub chat_id: ChatId,
    pub sender: Identity,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    pub timestamp: DateTime<Utc>,
    pub is_group: bool,
    pub mentioned_bot: bool,
    pub reply_to_bot: bool,
    /// Channel-specific participant identifier (e.g. WhatsApp group participant JID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    /// Open key/value bag for enrichment: reply/ambient context windows,
    /// sanitized text, mention scan results, and other per-stage annotations.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Concatenated plain text of all content blocks, in order, space-joined.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.as_plain_text())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The outcome of the policy engine for a single message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub accept_message: bool,
    pub should_respond: bool,
    pub allowed_tools: HashSet<String>,
    pub denied_tools: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_file: Option<String>,
    pub reason: String,
}

impl PolicyDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accept_message: false,
            should_respond: false,
            allowed_tools: HashSet::new(),
            denied_tools: HashSet::new(),
            persona_file: None,
            reason: reason.into(),
        }
    }
}

/// One conversational-context record surfaced to the Responder, built from
/// the inbound archive (reply-thread window or ambient window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub channel: ChannelTag,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender_id: SenderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
}

/// A declarative action emitted by the pipeline for downstream dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorIntent {
    OutboundText {
        channel: ChannelTag,
        chat_id: ChatId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },
    OutboundMedia {
        channel: ChannelTag,
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },
    Reaction {
        channel: ChannelTag,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: String,
    },
    Typing {
        channel: ChannelTag,
        chat_id: ChatId,
        state: TypingState,
    },
    MemoryCapture {
        channel: ChannelTag,
        chat_id: ChatId,
        sender: SenderId,
        message_id: MessageId,
        scope: String,
        text: String,
        kind: String,
        salience: f64,
    },
    MetricEvent {
        name: String,
        #[serde(default)]
        labels: HashMap<String, String>,
        #[serde(default)]
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingState {
    On,
    Off,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_plain_text_falls_back_by_kind() {
        let img = ContentBlock {
            kind: ContentKind::Image,
            text: None,
            path: None,
            mime_type: None,
            size_bytes: None,
            transcript: None,
            description: None,
        };
        assert_eq!(img.as_plain_text(), "[Image]");
    }

    #[test]
    fn content_block_prefers_transcript_over_placeholder() {
        let voice = ContentBlock {
            kind: ContentKind::Audio,
            text: None,
            path: None,
            mime_type: None,
            size_bytes: None,
            transcript: Some("call me back".to_string()),
            description: None,
        };
        assert_eq!(voice.as_plain_text(), "call me back");
    }

    #[test]
    fn message_text_joins_blocks_in_order() {
        let msg = Message {
            id: "m1".into(),
            channel: "whatsapp".into(),
            chat_id: "c1".into(),
            sender: Identity::new("s1"),
            content: vec![ContentBlock::text("hello"), ContentBlock::text("world")],
            reply_to: None,
            timestamp: Utc::now(),
            is_group: false,
            mentioned_bot: false,
            reply_to_bot: false,
            participant: None,
            metadata: HashMap::new(),
        };
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn orchestrator_intent_tag_round_trips() {
        let intent = OrchestratorIntent::OutboundText {
            channel: "telegram".into(),
            chat_id: "c1".into(),
            text: "hi".into(),
            reply_to: None,
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.contains(r#""kind":"outbound_text""#));
        let back: OrchestratorIntent = serde_json::from_str(&json).unwrap();
        match back {
            OrchestratorIntent::OutboundText { text, .. } => assert_eq!(text, "hi"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
