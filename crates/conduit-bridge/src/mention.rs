//! Bot-mention detection for WhatsApp group messages:
//! explicit `contextInfo.mentionedJid` entries, plus a scan of the raw text
//! for `@<digits, 5+>` patterns — WhatsApp clients render mentions this way
//! even when `mentionedJid` is (rarely) not populated by the sender's app.

use std::sync::OnceLock;

use regex::Regex;

use crate::jid::normalize_jid;

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\d{5,})").unwrap())
}

/// Scan `text` for `@<digits>` mention patterns (5+ digits, matching a
/// WhatsApp phone-number-derived JID user part).
pub fn scan_text_mentions(text: &str) -> Vec<String> {
    mention_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// `true` if any of `mentioned_jids` (from `contextInfo.mentionedJid`) or
/// digit sequences scanned out of `text` normalize to one of `self_jids`/
/// `self_tokens` (the bot's own JID(s) or bare user-id tokens).
pub fn is_bot_mentioned(mentioned_jids: &[String], text: &str, self_jids: &[String], self_tokens: &[String]) -> bool {
    let normalized_self: Vec<String> = self_jids.iter().map(|j| normalize_jid(j)).collect();

    for jid in mentioned_jids {
        let norm = normalize_jid(jid);
        if normalized_self.iter().any(|s| s == &norm) {
            return true;
        }
    }

    for digits in scan_text_mentions(text) {
        if self_tokens.iter().any(|t| t == &digits) {
            return true;
        }
        if normalized_self.iter().any(|s| s.starts_with(&digits)) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mention_via_context_info_jid() {
        let mentioned = vec!["15550001111@s.whatsapp.net".to_string()];
        assert!(is_bot_mentioned(&mentioned, "hi there", &["15550001111@s.whatsapp.net".to_string()], &[]));
    }

    #[test]
    fn detects_mention_via_text_scan() {
        assert!(is_bot_mentioned(&[], "hey @15550001111 wake up", &[], &["15550001111".to_string()]));
    }

    #[test]
    fn ignores_short_digit_runs() {
        assert!(scan_text_mentions("call @123 now").is_empty());
    }

    #[test]
    fn no_mention_when_neither_matches() {
        assert!(!is_bot_mentioned(&["999@s.whatsapp.net".to_string()], "no mention here", &["111@s.whatsapp.net".to_string()], &[]));
    }
}
