use thiserror::Error;

/// Errors produced by the WhatsApp bridge's session/transport layer. Distinct
/// from [`conduit_protocol::ProtocolError`], which is the wire-level error
/// the loopback server returns to connected clients.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("media download failed after retries: {0}")]
    MediaDownload(String),

    #[error("media path escapes the configured outgoing-media root")]
    MediaPathOutsideRoot,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("login timed out")]
    LoginTimeout,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
