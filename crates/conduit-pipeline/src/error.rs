use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("archive error: {0}")]
    Archive(#[from] conduit_archive::ArchiveError),

    #[error("memory error: {0}")]
    Memory(#[from] conduit_memory::MemoryError),

    #[error("policy error: {0}")]
    Policy(#[from] conduit_policy::PolicyError),

    #[error("responder error: {0}")]
    Responder(String),

    #[error("tts error: {0}")]
    Tts(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
