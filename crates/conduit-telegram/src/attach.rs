//! Inbound media handling for the Telegram adapter.
//!
//! Downloads Telegram media via `get_file` + `download_file` and persists it
//! under `media/incoming/telegram/YYYY/MM/DD/`, returning
//! a [`ContentBlock`] pointing at the local path rather than embedding bytes.

use std::path::Path;

use conduit_core::media::persist_media;
use conduit_core::types::{ContentBlock, ContentKind};
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

/// Extract media from a Telegram message and persist it, returning the
/// resulting content block. Returns `None` when the message has no
/// supported media, when the file exceeds `max_bytes`, or on download error.
pub async fn extract_media(bot: &Bot, msg: &Message, media_root: &Path, max_bytes: u64) -> Option<ContentBlock> {
    // photo — pick highest resolution (last element in the array)
    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            return download_as_block(bot, &photo.file.id, ContentKind::Image, "image/jpeg", media_root, max_bytes).await;
        }
    }

    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.as_ref()).unwrap_or("application/octet-stream");
        return download_as_block(bot, &doc.file.id, ContentKind::File, mime, media_root, max_bytes).await;
    }

    if let Some(video) = msg.video() {
        let mime = video.mime_type.as_ref().map(|m| m.as_ref()).unwrap_or("video/mp4");
        return download_as_block(bot, &video.file.id, ContentKind::Video, mime, media_root, max_bytes).await;
    }

    if let Some(audio) = msg.audio() {
        let mime = audio.mime_type.as_ref().map(|m| m.as_ref()).unwrap_or("audio/mpeg");
        return download_as_block(bot, &audio.file.id, ContentKind::Audio, mime, media_root, max_bytes).await;
    }

    if let Some(voice) = msg.voice() {
        let mime = voice.mime_type.as_ref().map(|m| m.as_ref()).unwrap_or("audio/ogg");
        return download_as_block(bot, &voice.file.id, ContentKind::Audio, mime, media_root, max_bytes).await;
    }

    if let Some(sticker) = msg.sticker() {
        return download_as_block(bot, &sticker.file.id, ContentKind::Sticker, "image/webp", media_root, max_bytes).await;
    }

    None
}

/// Download a file via the Telegram Bot API, persist it, and return its
/// content block. Returns `None` when `get_file`/`download_file` fails or
/// the file exceeds `max_bytes`.
async fn download_as_block(
    bot: &Bot,
    file_id: &str,
    kind: ContentKind,
    mime: &str,
    media_root: &Path,
    max_bytes: u64,
) -> Option<ContentBlock> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "Telegram: get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(file_id, size = file.size, limit = max_bytes, "Telegram: file exceeds size limit, skipping");
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "Telegram: download_file failed");
        return None;
    }

    let ext = mime.rsplit('/').next().unwrap_or("bin");
    let filename = format!("{file_id}.{ext}");
    let size_bytes = buf.len() as u64;

    let path = match persist_media(media_root, "telegram", chrono::Utc::now(), &filename, &buf) {
        Ok(p) => p,
        Err(e) => {
            warn!(file_id, error = %e, "Telegram: failed to persist downloaded media");
            return None;
        }
    };

    Some(ContentBlock {
        kind,
        text: None,
        path: Some(path.display().to_string()),
        mime_type: Some(mime.to_string()),
        size_bytes: Some(size_bytes),
        transcript: None,
        description: None,
    })
}

#[cfg(test)]
mod tests {
    #[test]
    fn size_guard_boundary() {
        let max: u64 = 20 * 1024 * 1024;
        assert!(max - 1 < max);
        assert!(max > max - 1);
    }
}
