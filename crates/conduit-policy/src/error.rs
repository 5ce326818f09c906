use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to write policy file: {0}")]
    Write(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown change id: {0}")]
    UnknownChange(String),

    #[error("admin command rate limit exceeded for {actor}")]
    RateLimited { actor: String },

    #[error("invalid admin command: {0}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
