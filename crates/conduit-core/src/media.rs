//! Shared inbound-media persistence helper.
//!
//! Used by every channel adapter that downloads platform media, and by the
//! WhatsApp bridge, so the directory/permission convention is written once.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;

/// The dated directory a piece of media arriving at `when` belongs in:
/// `<root>/<channel>/<YYYY>/<MM>/<DD>/`.
pub fn dated_incoming_dir(root: &Path, channel: &str, when: DateTime<Utc>) -> PathBuf {
    root.join(channel)
        .join(when.format("%Y").to_string())
        .join(when.format("%m").to_string())
        .join(when.format("%d").to_string())
}

/// Write `bytes` to `<dated_dir>/<file_stem>` creating parent directories as
/// needed, then apply the 0o700/0o600 mode convention (no-op on non-unix).
pub fn persist_media(root: &Path, channel: &str, when: DateTime<Utc>, file_stem: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = dated_incoming_dir(root, channel, when);
    std::fs::create_dir_all(&dir)?;
    harden_dir_permissions(&dir)?;

    let path = dir.join(file_stem);
    std::fs::write(&path, bytes)?;
    harden_file_permissions(&path)?;

    Ok(path)
}

#[cfg(unix)]
fn harden_dir_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_dir_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn harden_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dated_dir_follows_channel_year_month_day_layout() {
        let when = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let dir = dated_incoming_dir(Path::new("/media/incoming"), "telegram", when);
        assert_eq!(dir, PathBuf::from("/media/incoming/telegram/2026/03/07"));
    }

    #[test]
    fn persist_media_writes_bytes_and_sets_permissions() {
        let root = tempfile::tempdir().unwrap();
        let when = Utc::now();
        let path = persist_media(root.path(), "discord", when, "file123.jpg", b"fake-bytes").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"fake-bytes");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
