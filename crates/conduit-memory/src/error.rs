use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory entry not found: {0}")]
    NotFound(i64),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("embedder error: {0}")]
    Embedder(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
