use thiserror::Error;

/// Top-level error taxonomy shared across the workspace. Every variant maps
/// to a stable wire code via [`ConduitError::code`] so a pipeline-level
/// error and a bridge-level error of "the same kind" always serialize
/// identically.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("queue overflow: {queue}")]
    QueueOverflow { queue: String },

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConduitError {
    /// Stable short code, used both in bridge error envelopes and in
    /// log fields, so the two taxonomies never drift apart.
    pub fn code(&self) -> &'static str {
        match self {
            ConduitError::Config(_) => "CONFIG_ERROR",
            ConduitError::AuthFailed(_) => "ERR_AUTH",
            ConduitError::Protocol(_) => "ERR_SCHEMA",
            ConduitError::MethodNotFound { .. } => "ERR_UNSUPPORTED",
            ConduitError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ConduitError::Database(_) => "DATABASE_ERROR",
            ConduitError::Channel { .. } => "CHANNEL_ERROR",
            ConduitError::Serialization(_) => "SERIALIZATION_ERROR",
            ConduitError::Io(_) => "IO_ERROR",
            ConduitError::PayloadTooLarge { .. } => "ERR_PAYLOAD_TOO_LARGE",
            ConduitError::QueueOverflow { .. } => "ERR_QUEUE_OVERFLOW",
            ConduitError::Timeout { .. } => "TIMEOUT",
            ConduitError::Internal(_) => "ERR_INTERNAL",
        }
    }

    /// Whether a client may reasonably retry after this error.
    pub fn retryable(&self) -> bool {
        matches!(self, ConduitError::QueueOverflow { .. } | ConduitError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_overflow_is_retryable_but_payload_too_large_is_not() {
        let overflow = ConduitError::QueueOverflow {
            queue: "inbound".into(),
        };
        let too_large = ConduitError::PayloadTooLarge { size: 10, max: 5 };
        assert!(overflow.retryable());
        assert!(!too_large.retryable());
        assert_eq!(overflow.code(), "ERR_QUEUE_OVERFLOW");
        assert_eq!(too_large.code(), "ERR_PAYLOAD_TOO_LARGE");
    }
}
