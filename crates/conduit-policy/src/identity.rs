//! Sender identity normalization.
//!
//! Callers may supply a sender identity in several platform-specific forms;
//! the engine canonicalizes both sides before comparing against an
//! allow/deny list, so a policy file author doesn't need to know which exact
//! form a given channel happened to report.

/// Canonicalize a WhatsApp sender/JID: strip a `:N` device suffix, lowercase
/// the domain, and accept a bare phone number, `+`-prefixed number, or full
/// JID interchangeably.
pub fn normalize_whatsapp(raw: &str) -> String {
    let raw = raw.trim();
    let (local, domain) = match raw.split_once('@') {
        Some((l, d)) => (l, Some(d)),
        None => (raw, None),
    };
    let local = match local.split_once(':') {
        Some((l, _device)) => l,
        None => local,
    };
    let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
    match domain {
        Some(d) => format!("{digits}@{}", d.to_lowercase()),
        None => digits,
    }
}

/// Canonicalize a Telegram sender: a numeric id is returned as-is; an
/// `@handle` (with or without the leading `@`) is lowercased.
pub fn normalize_telegram(raw: &str) -> String {
    let raw = raw.trim();
    if raw.chars().all(|c| c.is_ascii_digit()) && !raw.is_empty() {
        return raw.to_string();
    }
    let handle = raw.strip_prefix('@').unwrap_or(raw);
    format!("@{}", handle.to_lowercase())
}

/// Normalize a sender id for the given channel. Channels without a specific
/// normalization rule (Discord, Feishu) are compared case-sensitively as-is.
pub fn normalize(channel: &str, raw: &str) -> String {
    match channel {
        "whatsapp" => normalize_whatsapp(raw),
        "telegram" => normalize_telegram(raw),
        _ => raw.trim().to_string(),
    }
}

/// True if `sender`'s canonical form matches any canonical form in `list`.
pub fn matches_any(channel: &str, sender: &str, list: &[String]) -> bool {
    let canonical_sender = normalize(channel, sender);
    list.iter().any(|entry| normalize(channel, entry) == canonical_sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_strips_device_suffix_and_lowercases_domain() {
        assert_eq!(
            normalize_whatsapp("15551234567:5@S.WHATSAPP.NET"),
            "15551234567@s.whatsapp.net"
        );
    }

    #[test]
    fn whatsapp_bare_number_and_plus_prefixed_normalize_equal() {
        assert_eq!(normalize_whatsapp("+1 555 123 4567"), normalize_whatsapp("15551234567"));
    }

    #[test]
    fn telegram_username_matches_regardless_of_at_and_case() {
        assert_eq!(normalize_telegram("@SomeUser"), normalize_telegram("someuser"));
    }

    #[test]
    fn telegram_numeric_id_is_unchanged() {
        assert_eq!(normalize_telegram("123456789"), "123456789");
    }

    #[test]
    fn matches_any_finds_canonical_equivalent() {
        let owners = vec!["+1 (555) 123-4567".to_string()];
        assert!(matches_any("whatsapp", "15551234567@s.whatsapp.net", &owners));
    }

    #[test]
    fn matches_any_rejects_unlisted_sender() {
        let owners = vec!["15551234567".to_string()];
        assert!(!matches_any("whatsapp", "19998887777@s.whatsapp.net", &owners));
    }
}
