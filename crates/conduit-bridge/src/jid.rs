//! WhatsApp JID helpers.

pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Normalize a JID by discarding the `:device` suffix on the user part and
/// rejoining `user@server` — `"15551234567:12@s.whatsapp.net"` becomes
/// `"15551234567@s.whatsapp.net"`. JIDs without an `@` are returned as-is.
pub fn normalize_jid(raw: &str) -> String {
    match raw.split_once('@') {
        Some((user, server)) => {
            let user = user.split_once(':').map(|(u, _)| u).unwrap_or(user);
            format!("{user}@{server}")
        }
        None => raw.to_string(),
    }
}

/// `true` for WhatsApp group JIDs (`...@g.us`).
pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

/// `true` for the status-broadcast pseudo-chat, which is always dropped.
pub fn is_status_broadcast(jid: &str) -> bool {
    jid == STATUS_BROADCAST_JID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_device_suffix() {
        assert_eq!(normalize_jid("15551234567:12@s.whatsapp.net"), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn leaves_bare_jid_unchanged() {
        assert_eq!(normalize_jid("15551234567@s.whatsapp.net"), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn group_jid_detection() {
        assert!(is_group_jid("120363@g.us"));
        assert!(!is_group_jid("15551234567@s.whatsapp.net"));
    }

    #[test]
    fn status_broadcast_detection() {
        assert!(is_status_broadcast("status@broadcast"));
        assert!(!is_status_broadcast("120363@g.us"));
    }
}
