use thiserror::Error;

/// Errors that can occur while reading or appending to a session file.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("malformed session line in {path}: {source}")]
    Malformed { path: String, #[source] source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, SessionError>;
