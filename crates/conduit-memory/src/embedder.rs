//! Embedding contract. Computing
//! embeddings is out of scope for the core; callers supply an
//! [`Embedder`] implementation backed by whatever model route they use.

/// Computes a float vector embedding for a piece of text.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>>;
}

/// An [`Embedder`] that always returns `Err` — the default when no vector
/// backend is configured. `MemoryManager::recall` tolerates a missing
/// embedding (`vec_score` falls back to 0), so callers can wire this in and
/// run lexical-only recall until a real embedder is available.
pub struct NullEmbedder;

impl Embedder for NullEmbedder {
    fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
        Err(crate::error::MemoryError::Embedder(
            "no vector backend configured".to_string(),
        ))
    }
}
