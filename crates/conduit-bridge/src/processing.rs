//! The 14-step inbound message pipeline. Pure with respect to the session's caches (steps 4/5)
//! and a side effect for step 12 (media persistence) and step 13 (read
//! receipts, left to the caller since it needs the live transport).

use std::collections::HashMap;
use std::path::Path;

use conduit_core::types::{ChatId, ContentBlock, ContentKind, Identity, Message as CoreMessage, ReplyRef};
use tracing::warn;

use crate::jid::{is_group_jid, is_status_broadcast, normalize_jid};
use crate::media::{download_image_with_retry, incoming_media_path, persist_media_bytes};
use crate::mention::is_bot_mentioned;
use crate::raw::{RawContent, RawContextInfo, RawInboundMessage};
use crate::session::{BridgeSession, BridgeSettings};

pub const MAX_UNWRAP_DEPTH: usize = 6;
pub const QUOTED_TEXT_TRUNCATE: usize = 1_000;

/// Outcome of running one raw inbound message through the bridge's
/// processing steps.
pub enum Processed {
    /// Produced a canonical message to hand to the pipeline.
    Message(CoreMessage),
    /// Dropped — status broadcast, empty remote JID, self-echo, or
    /// duplicate. Carries a short reason for telemetry.
    Dropped(&'static str),
}

/// Run steps 1–11 (synchronous) and step 12 (media persistence, async) over
/// one raw inbound message. Step 13 (read receipts) and step 14 (event
/// emission) are the caller's responsibility once a `Processed::Message` is
/// returned — they need the live transport/event sink, not just session
/// state.
pub async fn process_inbound(
    channel_name: &str,
    session: &BridgeSession,
    incoming_media_root: &Path,
    raw: RawInboundMessage,
    media_client: &reqwest::Client,
) -> Processed {
    // Step 1: drop status broadcasts and messages with an empty remote JID.
    let remote_jid_raw = raw.key.remote_jid.clone();
    if remote_jid_raw.trim().is_empty() {
        return Processed::Dropped("empty_remote_jid");
    }
    if is_status_broadcast(&remote_jid_raw) {
        return Processed::Dropped("status_broadcast");
    }

    // Step 2: normalize the chat JID.
    let chat_jid = normalize_jid(&remote_jid_raw);

    // Step 3: fromMe gate.
    if raw.key.from_me {
        let already_ours = session.is_own_echo(&raw.key.id);
        if !(session.settings.accept_from_me && !already_ours) {
            return Processed::Dropped("from_me");
        }
    }

    // Step 4: cache the raw message for later reply-quote resolution.
    session.cache_for_quote(&chat_jid, &raw.key.id, raw.clone());

    // Step 5: dedup.
    if session.check_and_record_inbound(&chat_jid, &raw.key.id) {
        return Processed::Dropped("duplicate");
    }

    // Step 6: group detection.
    let is_group = is_group_jid(&chat_jid);

    // Step 7: participant resolution. In groups, the sender is
    // `key.participant` (or the top-level `participant` field); in 1:1
    // chats it is *always* the remote JID itself — `contextInfo.participant`
    // on a 1:1 message names the author of a *quoted* message, not the
    // sender, and using it here would misattribute the sender.
    let participant = if is_group {
        raw.key.participant.clone().map(|p| normalize_jid(&p))
    } else {
        Some(chat_jid.clone())
    };

    // Step 8: unwrap nested envelopes.
    let (inner, context_info) = raw.unwrap(MAX_UNWRAP_DEPTH);

    // Step 9: extract text/media.
    let content = extract_content(&inner.content);
    if content.is_empty() {
        return Processed::Dropped("no_content");
    }

    // Step 10: reply metadata from contextInfo.
    let reply_to = context_info.and_then(build_reply_ref);

    // Step 12: persist media for configured kinds.
    let content = persist_configured_media(session, incoming_media_root, &raw.key.id, raw.timestamp, content, media_client).await;

    // Step 11: mention detection.
    let text_for_scan = content.iter().filter_map(|b| b.text.clone()).collect::<Vec<_>>().join(" ");
    let mentioned_jid = context_info.map(|c| c.mentioned_jid.clone()).unwrap_or_default();
    let mentioned_bot = is_group
        && is_bot_mentioned(&mentioned_jid, &text_for_scan, &session.settings.self_jids, &session.settings.self_tokens);

    let reply_to_bot = reply_to
        .as_ref()
        .and_then(|r| r.sender.as_ref())
        .map(|s| session.settings.self_jids.iter().any(|j| normalize_jid(j) == normalize_jid(s.as_str())))
        .unwrap_or(false);

    let sender_id = participant.clone().unwrap_or_else(|| chat_jid.clone());

    let message = CoreMessage {
        id: raw.key.id.clone().into(),
        channel: channel_name.into(),
        chat_id: ChatId::from(chat_jid),
        sender: Identity {
            id: sender_id.into(),
            display_name: raw.push_name.clone(),
            handle: None,
        },
        content,
        reply_to,
        timestamp: raw.timestamp,
        is_group,
        mentioned_bot,
        reply_to_bot,
        participant: participant.clone(),
        metadata: HashMap::new(),
    };

    Processed::Message(message)
}

fn extract_content(content: &RawContent) -> Vec<ContentBlock> {
    match content {
        RawContent::Conversation(text) | RawContent::ExtendedText(text) => vec![ContentBlock::text(text)],
        RawContent::Image(m) => vec![media_block(ContentKind::Image, m)],
        RawContent::Audio(m) => vec![media_block(ContentKind::Audio, m)],
        RawContent::Video(m) => vec![media_block(ContentKind::Video, m)],
        RawContent::Sticker(m) => vec![media_block(ContentKind::Sticker, m)],
        RawContent::Document(m) => vec![media_block(ContentKind::File, m)],
        RawContent::DocumentWithCaption(inner, caption) => {
            let mut blocks = extract_content(&inner.content);
            if let Some(caption) = caption {
                blocks.push(ContentBlock::text(caption));
            }
            blocks
        }
        RawContent::Ephemeral(inner) | RawContent::ViewOnce(inner) => extract_content(&inner.content),
    }
}

fn media_block(kind: ContentKind, media: &crate::raw::MediaRef) -> ContentBlock {
    ContentBlock {
        kind,
        text: None,
        path: None,
        mime_type: media.mime_type.clone(),
        size_bytes: None,
        transcript: None,
        description: None,
    }
}

fn build_reply_ref(ctx: &RawContextInfo) -> Option<ReplyRef> {
    let stanza_id = ctx.stanza_id.clone()?;
    let text = ctx.quoted_text.as_ref().map(|t| truncate(t, QUOTED_TEXT_TRUNCATE));
    Some(ReplyRef {
        message_id: stanza_id.into(),
        text,
        sender: ctx.quoted_participant.clone().map(Into::into),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Persist bytes for content blocks whose kind is eligible under the
/// session's `BridgeSettings` flags: images always, audio/video/sticker
/// gated by config. Blocks whose source has no URL (already
/// inline, or a kind that's never persisted) pass through unchanged.
async fn persist_configured_media(
    session: &BridgeSession,
    incoming_root: &Path,
    message_id: &str,
    when: chrono::DateTime<chrono::Utc>,
    mut content: Vec<ContentBlock>,
    media_client: &reqwest::Client,
) -> Vec<ContentBlock> {
    for block in content.iter_mut() {
        let eligible = match block.kind {
            ContentKind::Image => true,
            ContentKind::Audio => session.settings.persist_inbound_audio,
            ContentKind::Video => session.settings.persist_inbound_video,
            ContentKind::Sticker => session.settings.persist_inbound_sticker,
            ContentKind::File | ContentKind::Text => false,
        };
        if !eligible {
            continue;
        }
        // Only images are re-fetched with retry; other kinds are assumed
        // already delivered as decrypted bytes by the transport out of
        // band and are not re-downloaded here.
        if block.kind != ContentKind::Image {
            continue;
        }
        let media_ref = crate::raw::MediaRef {
            url: block.path.clone(),
            mime_type: block.mime_type.clone(),
            file_name: None,
        };
        match download_image_with_retry(media_client, &media_ref).await {
            Ok(bytes) => {
                let ext = extension_for(block.mime_type.as_deref());
                match incoming_media_path(incoming_root, when, message_id, ext) {
                    Ok(path) => {
                        if let Err(e) = persist_media_bytes(&path, &bytes) {
                            warn!(error = %e, "failed to persist inbound media");
                        } else {
                            block.size_bytes = Some(bytes.len() as u64);
                            block.path = Some(path.to_string_lossy().to_string());
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to build incoming media path"),
                }
            }
            Err(e) => warn!(error = %e, "inbound image download exhausted retries"),
        }
    }
    content
}

fn extension_for(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some(m) if m.starts_with("image/") => "jpg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{MediaRef, RawKey, RawMessageNode};
    use chrono::Utc;

    fn base_raw(remote_jid: &str, id: &str, text: &str) -> RawInboundMessage {
        RawInboundMessage {
            key: RawKey { remote_jid: remote_jid.to_string(), id: id.to_string(), from_me: false, participant: None },
            push_name: Some("Alice".to_string()),
            timestamp: Utc::now(),
            message: RawMessageNode { content: RawContent::Conversation(text.to_string()), context_info: None },
        }
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            accept_from_me: false,
            read_receipts: true,
            persist_inbound_audio: false,
            persist_inbound_video: false,
            persist_inbound_sticker: false,
            self_jids: vec!["15550009999@s.whatsapp.net".to_string()],
            self_tokens: vec!["15550009999".to_string()],
        }
    }

    #[tokio::test]
    async fn status_broadcast_is_dropped() {
        let session = BridgeSession::new(settings());
        let raw = base_raw("status@broadcast", "M1", "hi");
        let tmp = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let processed = process_inbound("whatsapp", &session, tmp.path(), raw, &client).await;
        assert!(matches!(processed, Processed::Dropped("status_broadcast")));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped_second_time() {
        let session = BridgeSession::new(settings());
        let tmp = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let first = process_inbound("whatsapp", &session, tmp.path(), base_raw("15551234567@s.whatsapp.net", "M1", "hi"), &client).await;
        assert!(matches!(first, Processed::Message(_)));
        let second = process_inbound("whatsapp", &session, tmp.path(), base_raw("15551234567@s.whatsapp.net", "M1", "hi"), &client).await;
        assert!(matches!(second, Processed::Dropped("duplicate")));
    }

    #[tokio::test]
    async fn one_to_one_participant_is_always_remote_jid() {
        let session = BridgeSession::new(settings());
        let tmp = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let mut raw = base_raw("A@s.whatsapp.net", "M1", "hi");
        raw.message.context_info = Some(RawContextInfo {
            quoted_participant: Some("B@lid".to_string()),
            ..Default::default()
        });
        let processed = process_inbound("whatsapp", &session, tmp.path(), raw, &client).await;
        match processed {
            Processed::Message(msg) => assert_eq!(msg.sender.id.as_str(), "A@s.whatsapp.net"),
            _ => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn group_participant_uses_key_participant() {
        let session = BridgeSession::new(settings());
        let tmp = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let mut raw = base_raw("120363@g.us", "M1", "hi");
        raw.key.participant = Some("15559990000@s.whatsapp.net".to_string());
        let processed = process_inbound("whatsapp", &session, tmp.path(), raw, &client).await;
        match processed {
            Processed::Message(msg) => {
                assert!(msg.is_group);
                assert_eq!(msg.sender.id.as_str(), "15559990000@s.whatsapp.net");
            }
            _ => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn mention_of_self_jid_sets_mentioned_bot() {
        let session = BridgeSession::new(settings());
        let tmp = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let mut raw = base_raw("120363@g.us", "M1", "hey bot");
        raw.key.participant = Some("1@s.whatsapp.net".to_string());
        raw.message.context_info = Some(RawContextInfo {
            mentioned_jid: vec!["15550009999@s.whatsapp.net".to_string()],
            ..Default::default()
        });
        let processed = process_inbound("whatsapp", &session, tmp.path(), raw, &client).await;
        match processed {
            Processed::Message(msg) => assert!(msg.mentioned_bot),
            _ => panic!("expected a message"),
        }
    }
}
