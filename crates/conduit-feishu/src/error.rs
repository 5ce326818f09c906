use thiserror::Error;

/// Errors produced by the Feishu adapter.
#[derive(Debug, Error)]
pub enum FeishuError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feishu api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("webhook authentication failed")]
    Auth,

    #[error("configuration error: {0}")]
    ConfigError(String),
}
