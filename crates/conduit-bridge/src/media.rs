//! Inbound media persistence and outgoing `mediaPath` containment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::raw::MediaRef;

/// Backoff schedule for retrying an inbound image download.
pub const IMAGE_DOWNLOAD_BACKOFF_MS: [u64; 3] = [250, 500, 1000];

#[cfg(unix)]
fn set_dir_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Build `<incoming_root>/<YYYY>/<MM>/<DD>/<message_id>.<ext>`, creating the
/// date-partitioned parent directories (mode 0o700) if missing.
pub fn incoming_media_path(incoming_root: &Path, when: DateTime<Utc>, message_id: &str, ext: &str) -> Result<PathBuf> {
    let year_dir = incoming_root.join(when.format("%Y").to_string());
    let month_dir = year_dir.join(when.format("%m").to_string());
    let day_dir = month_dir.join(when.format("%d").to_string());
    std::fs::create_dir_all(&day_dir)?;
    for dir in [&year_dir, &month_dir, &day_dir] {
        set_dir_mode(dir)?;
    }
    Ok(day_dir.join(format!("{message_id}.{ext}")))
}

/// Write `bytes` to `path` with file mode 0o600.
pub fn persist_media_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    set_file_mode(path)?;
    Ok(())
}

/// Download an image with the configured retry/backoff schedule.
/// Other media kinds are persisted directly from already-decrypted bytes
/// the transport hands over; only image downloads get this retry treatment.
pub async fn download_image_with_retry(client: &reqwest::Client, media: &MediaRef) -> Result<Vec<u8>> {
    let Some(url) = &media.url else {
        return Err(BridgeError::MediaDownload("no source url".to_string()));
    };
    let mut last_err = String::new();
    for (attempt, delay_ms) in std::iter::once(0).chain(IMAGE_DOWNLOAD_BACKOFF_MS).enumerate() {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => return Ok(b.to_vec()),
                Err(e) => last_err = e.to_string(),
            },
            Ok(resp) => last_err = format!("http status {}", resp.status()),
            Err(e) => last_err = e.to_string(),
        }
        warn!(attempt, error = %last_err, "image download attempt failed");
    }
    Err(BridgeError::MediaDownload(last_err))
}

/// Resolve `mediaPath` against the configured outgoing-media root,
/// following symlinks, and reject anything that escapes it.
pub fn resolve_outgoing_media_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let candidate = root.join(requested);
    let canonical_root = std::fs::canonicalize(root)?;
    let canonical = std::fs::canonicalize(&candidate)?;
    if !canonical.starts_with(&canonical_root) {
        return Err(BridgeError::MediaPathOutsideRoot);
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn incoming_path_is_date_partitioned() {
        let tmp = tempfile::tempdir().unwrap();
        let when = Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap();
        let path = incoming_media_path(tmp.path(), when, "M123", "jpg").unwrap();
        assert!(path.ends_with("2026/03/05/M123.jpg"));
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn outgoing_path_rejects_escape() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/allowed.png"), b"x").unwrap();
        std::fs::write(tmp.path().join("../outside.png"), b"x").ok();

        let ok = resolve_outgoing_media_path(&tmp.path().join("sub"), "allowed.png");
        assert!(ok.is_ok());

        let escape = resolve_outgoing_media_path(&tmp.path().join("sub"), "../../etc/passwd");
        assert!(escape.is_err());
    }
}
