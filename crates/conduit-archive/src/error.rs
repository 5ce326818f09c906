use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
