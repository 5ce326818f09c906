//! The seam between the bridge's session/processing logic and the
//! component that actually speaks WhatsApp's multi-device protocol to
//! Meta's servers.
//! Everything specified *about the bridge itself* — dedup, quote
//! resolution, participant resolution, media persistence, the wire
//! protocol, reconnect supervision — is implemented against this trait, not
//! against a specific WhatsApp library.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raw::RawInboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Available,
    Unavailable,
    Composing,
    Paused,
    Recording,
}

#[derive(Debug, Clone)]
pub enum MediaSource {
    Url(String),
    Base64(String),
    Path(std::path::PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub jid: String,
    pub subject: String,
    #[serde(rename = "participantCount")]
    pub participant_count: usize,
}

#[derive(Debug, Clone)]
pub enum QrOutcome {
    /// A fresh QR string was produced and is awaiting a scan.
    Qr(String),
    /// The account is already (or became) authenticated.
    Connected,
    /// No QR appeared and no connection formed within the timeout.
    TimedOut,
}

/// Outbound actions + session control the bridge needs from the underlying
/// WhatsApp client. Implementations own the live socket; inbound messages
/// are delivered out-of-band via whatever channel the implementation is
/// constructed with (see `conduit-bridge::session::BridgeSession`).
#[async_trait]
pub trait WhatsAppTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    /// Returns the outbound platform message id on success.
    async fn send_text(&self, to: &str, text: &str, reply_to: Option<&RawInboundMessage>) -> Result<String>;
    async fn send_media(
        &self,
        to: &str,
        source: MediaSource,
        mime_type: Option<&str>,
        file_name: Option<&str>,
        caption: Option<&str>,
        reply_to: Option<&RawInboundMessage>,
    ) -> Result<String>;
    async fn send_poll(&self, to: &str, question: &str, options: &[String], max_selections: Option<u32>) -> Result<String>;
    async fn react(&self, chat_jid: &str, message_id: &str, emoji: &str, participant: Option<&str>, from_me: bool) -> Result<()>;
    async fn presence_update(&self, state: PresenceState, chat_jid: Option<&str>) -> Result<()>;
    async fn list_groups(&self, ids: Option<&[String]>) -> Result<Vec<GroupInfo>>;

    async fn login_start(&self, force: bool, timeout_ms: u64) -> Result<QrOutcome>;
    async fn login_wait(&self, timeout_ms: u64) -> Result<QrOutcome>;
    async fn logout(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
    fn account_id(&self) -> String;
}

/// Test/standalone-deployment transport: accepts every send, never connects
/// to anything real. Useful for exercising the protocol layer and session
/// caches without a live WhatsApp account.
pub struct NullTransport {
    account_id: String,
}

impl NullTransport {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self { account_id: account_id.into() }
    }
}

#[async_trait]
impl WhatsAppTransport for NullTransport {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
    async fn send_text(&self, _to: &str, _text: &str, _reply_to: Option<&RawInboundMessage>) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
    async fn send_media(
        &self,
        _to: &str,
        _source: MediaSource,
        _mime_type: Option<&str>,
        _file_name: Option<&str>,
        _caption: Option<&str>,
        _reply_to: Option<&RawInboundMessage>,
    ) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
    async fn send_poll(&self, _to: &str, _question: &str, _options: &[String], _max_selections: Option<u32>) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
    async fn react(&self, _chat_jid: &str, _message_id: &str, _emoji: &str, _participant: Option<&str>, _from_me: bool) -> Result<()> {
        Ok(())
    }
    async fn presence_update(&self, _state: PresenceState, _chat_jid: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn list_groups(&self, _ids: Option<&[String]>) -> Result<Vec<GroupInfo>> {
        Ok(Vec::new())
    }
    async fn login_start(&self, _force: bool, _timeout_ms: u64) -> Result<QrOutcome> {
        Ok(QrOutcome::Connected)
    }
    async fn login_wait(&self, _timeout_ms: u64) -> Result<QrOutcome> {
        Ok(QrOutcome::Connected)
    }
    async fn logout(&self) -> Result<()> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
    fn account_id(&self) -> String {
        self.account_id.clone()
    }
}
