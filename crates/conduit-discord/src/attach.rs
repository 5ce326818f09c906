//! Inbound attachment handling for the Discord adapter.
//!
//! Downloads Discord CDN attachments over plain HTTP and persists them under
//! `media/incoming/discord/YYYY/MM/DD/`, returning a
//! [`ContentBlock`] pointing at the local path.

use std::path::Path;

use conduit_core::media::persist_media;
use conduit_core::types::{ContentBlock, ContentKind};
use serenity::model::channel::Attachment;
use tracing::warn;

/// Download and persist a single attachment, classifying its `ContentKind`
/// from the declared MIME type. Returns `None` when it exceeds `max_bytes`
/// or the download fails.
pub async fn to_content_block(attachment: &Attachment, media_root: &Path, max_bytes: u64) -> Option<ContentBlock> {
    if u64::from(attachment.size) > max_bytes {
        warn!(filename = %attachment.filename, size = attachment.size, limit = max_bytes, "Discord: attachment exceeds size limit, skipping");
        return None;
    }

    let mime = attachment.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string());
    let kind = classify(&mime, &attachment.filename);

    let bytes = match download_bytes(&attachment.url).await {
        Ok(b) => b,
        Err(e) => {
            warn!(filename = %attachment.filename, error = %e, "Discord: attachment download failed");
            return None;
        }
    };

    let size_bytes = bytes.len() as u64;
    let path = match persist_media(media_root, "discord", chrono::Utc::now(), &attachment.filename, &bytes) {
        Ok(p) => p,
        Err(e) => {
            warn!(filename = %attachment.filename, error = %e, "Discord: failed to persist attachment");
            return None;
        }
    };

    Some(ContentBlock {
        kind,
        text: None,
        path: Some(path.display().to_string()),
        mime_type: Some(mime),
        size_bytes: Some(size_bytes),
        transcript: None,
        description: None,
    })
}

fn classify(mime: &str, filename: &str) -> ContentKind {
    if mime.starts_with("image/") {
        ContentKind::Image
    } else if mime == "audio/ogg" && filename.ends_with(".ogg") {
        ContentKind::Audio
    } else if mime.starts_with("audio/") {
        ContentKind::Audio
    } else if mime.starts_with("video/") {
        ContentKind::Video
    } else {
        ContentKind::File
    }
}

async fn download_bytes(url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let resp = reqwest::get(url).await?;
    resp.bytes().await.map(|b| b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_image_by_mime() {
        assert!(matches!(classify("image/png", "x.png"), ContentKind::Image));
    }

    #[test]
    fn classify_voice_ogg_as_audio() {
        assert!(matches!(classify("audio/ogg", "voice.ogg"), ContentKind::Audio));
    }

    #[test]
    fn classify_unknown_as_file() {
        assert!(matches!(classify("application/zip", "x.zip"), ContentKind::File));
    }
}
