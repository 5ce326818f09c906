//! Feishu/Lark adapter: a thin [`conduit_channels::Channel`] implementation
//! backed by a webhook receiver for inbound events and the `im/v1` bot REST
//! API for outbound sends.

pub mod adapter;
pub mod error;
pub mod send;
pub mod token;
pub mod webhook;

pub use adapter::{FeishuChannel, FeishuSettings};
pub use error::FeishuError;
