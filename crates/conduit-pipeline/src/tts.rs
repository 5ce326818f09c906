use async_trait::async_trait;

/// External text-to-speech collaborator used by the Outbound stage's voice
/// policy. The model call itself is out of scope for this crate; only the
/// contract this trait exposes is specified.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize `text` to audio, returning a path to the resulting file
    /// and its mime type. Errors (including size overflow, which the
    /// implementation should detect and report rather than truncate) cause
    /// the Outbound stage to fall back to a text reply.
    async fn synthesize(&self, text: &str) -> Result<(String, String), String>;
}

/// No TTS backend configured — every voice reply falls back to text.
pub struct NullTts;

#[async_trait]
impl TtsProvider for NullTts {
    async fn synthesize(&self, _text: &str) -> Result<(String, String), String> {
        Err("no TTS provider configured".to_string())
    }
}
