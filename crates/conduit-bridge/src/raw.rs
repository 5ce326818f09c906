//! Minimal shape of a raw inbound WhatsApp message as handed to the bridge
//! by the session-managing WhatsApp client. This is the seam
//! between "whatever library actually speaks the WhatsApp multi-device
//! protocol" and the bridge's own
//! processing: dedup, participant resolution, nested-envelope unwrap,
//! media persistence, and event emission all operate purely on this type.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RawKey {
    pub remote_jid: String,
    pub id: String,
    pub from_me: bool,
    /// Present only for group messages — the sender's participant JID.
    pub participant: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaRef {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RawContent {
    Conversation(String),
    ExtendedText(String),
    Image(MediaRef),
    Audio(MediaRef),
    Video(MediaRef),
    Sticker(MediaRef),
    Document(MediaRef),
    /// `ephemeralMessage`, `viewOnceMessage(V2)`: wraps another node.
    Ephemeral(Box<RawMessageNode>),
    ViewOnce(Box<RawMessageNode>),
    /// `documentWithCaptionMessage`: wraps a document node plus caption text.
    DocumentWithCaption(Box<RawMessageNode>, Option<String>),
}

#[derive(Debug, Clone, Default)]
pub struct RawContextInfo {
    pub stanza_id: Option<String>,
    pub quoted_participant: Option<String>,
    pub quoted_text: Option<String>,
    pub mentioned_jid: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RawMessageNode {
    pub content: RawContent,
    pub context_info: Option<RawContextInfo>,
}

#[derive(Debug, Clone)]
pub struct RawInboundMessage {
    pub key: RawKey,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: RawMessageNode,
}

impl RawInboundMessage {
    /// Unwrap nested envelopes (ephemeral / view-once / document-with-caption)
    /// up to `max_depth` levels, returning the innermost node along with the
    /// context info from the *outermost* node that carried one — matching
    /// how WhatsApp clients attach `contextInfo` (reply metadata, mentions)
    /// to the wrapper, not the innermost payload.
    pub fn unwrap(&self, max_depth: usize) -> (&RawMessageNode, Option<&RawContextInfo>) {
        let mut node = &self.message;
        let mut outer_context = node.context_info.as_ref();
        let mut depth = 0;
        loop {
            if depth >= max_depth {
                break;
            }
            let next = match &node.content {
                RawContent::Ephemeral(inner) | RawContent::ViewOnce(inner) => inner,
                RawContent::DocumentWithCaption(inner, _) => inner,
                _ => break,
            };
            if outer_context.is_none() {
                outer_context = next.context_info.as_ref();
            }
            node = next;
            depth += 1;
        }
        (node, outer_context)
    }
}
