//! Bot-mention detection for guild channels, used to populate
//! `Message.mentioned_bot` so the Policy stage's mention-only mode works.

use serenity::model::id::UserId;

/// Return `true` if `content` contains a `<@bot_id>` or `<@!bot_id>` mention.
pub fn contains_mention(content: &str, bot_id: UserId) -> bool {
    let plain = format!("<@{bot_id}>");
    let nickname = format!("<@!{bot_id}>");
    content.contains(&plain) || content.contains(&nickname)
}

/// Strip a leading `<@bot_id>`/`<@!bot_id>` mention, returning the trimmed
/// remainder. Used so a guild message that opens with the mention reads the
/// same as a plain-text command.
pub fn strip_leading_mention(content: &str) -> &str {
    let trimmed = content.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        if let Some(end) = rest.find('>') {
            return rest[end + 1..].trim_start();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("hey <@12345> help", UserId::new(12345)));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("hello there", UserId::new(12345)));
    }

    #[test]
    fn strip_leading_mention_removes_prefix() {
        assert_eq!(strip_leading_mention("<@12345> hello"), "hello");
        assert_eq!(strip_leading_mention("<@!12345> hello"), "hello");
        assert_eq!(strip_leading_mention("hello"), "hello");
    }
}
