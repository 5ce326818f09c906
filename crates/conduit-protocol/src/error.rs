use serde::Serialize;
use thiserror::Error;

/// Wire-level error kinds for the WhatsApp bridge protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    ProtocolVersion(u32),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("authentication failed")]
    Auth,

    #[error("unsupported command: {0}")]
    Unsupported(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("outbound queue overflow")]
    QueueOverflow,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::ProtocolVersion(_) => "ERR_PROTOCOL_VERSION",
            ProtocolError::Schema(_) => "ERR_SCHEMA",
            ProtocolError::Auth => "ERR_AUTH",
            ProtocolError::Unsupported(_) => "ERR_UNSUPPORTED",
            ProtocolError::PayloadTooLarge { .. } => "ERR_PAYLOAD_TOO_LARGE",
            ProtocolError::QueueOverflow => "ERR_QUEUE_OVERFLOW",
            ProtocolError::Internal(_) => "ERR_INTERNAL",
        }
    }

    /// Overflow may be retried after backoff; size and schema violations
    /// are not, since resending the same payload will fail the same way.
    pub fn retryable(&self) -> bool {
        matches!(self, ProtocolError::QueueOverflow)
    }

    /// Build the wire-shaped `{code, message, retryable}` body, with any
    /// occurrence of `token` in the message replaced by `***`.
    pub fn to_wire(&self, token: &str) -> WireError {
        let message = sanitize(&self.to_string(), token);
        WireError {
            code: self.code().to_string(),
            message,
            retryable: self.retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Replace every occurrence of `token` in `text` with `***`. A no-op when
/// `token` is empty, so an unconfigured bridge never masks arbitrary text.
pub fn sanitize(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, "***")
}

pub type ParseResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_token_substring() {
        let msg = "auth failed for token secret-123 on connect";
        assert_eq!(
            sanitize(msg, "secret-123"),
            "auth failed for token *** on connect"
        );
    }

    #[test]
    fn sanitize_is_noop_on_empty_token() {
        assert_eq!(sanitize("hello world", ""), "hello world");
    }

    #[test]
    fn queue_overflow_retryable_others_not() {
        assert!(ProtocolError::QueueOverflow.retryable());
        assert!(!ProtocolError::Auth.retryable());
        assert!(!ProtocolError::PayloadTooLarge { size: 1, max: 1 }.retryable());
    }
}
