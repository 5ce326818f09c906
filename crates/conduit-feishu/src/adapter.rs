//! Feishu channel adapter: implements [`conduit_channels::Channel`] over a
//! webhook receiver (inbound) and the `im/v1` bot REST API (outbound).
//!
//! Unlike Telegram/Discord's long-lived gateway connections, Feishu delivers
//! events by calling a webhook URL we expose, so `connect()` here means
//! "start listening," not "open a persistent session."

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use conduit_channels::{Channel, ChannelError, ChannelStatus, InboundQueue};
use conduit_core::types::OrchestratorIntent;

use crate::send;
use crate::token::TokenCache;
use crate::webhook::{router, WebhookState};

/// Configuration the adapter needs: app credentials, the bind address for
/// the event webhook, and media handling limits.
#[derive(Debug, Clone)]
pub struct FeishuSettings {
    pub app_id: String,
    pub app_secret: String,
    pub verification_token: Option<String>,
    pub bind_host: String,
    pub bind_port: u16,
    pub max_attachment_bytes: u64,
    pub media_root: PathBuf,
}

pub struct FeishuChannel {
    settings: FeishuSettings,
    queue: Arc<InboundQueue>,
    tokens: Arc<TokenCache>,
    http_client: reqwest::Client,
    server_task: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<ChannelStatus>,
}

impl FeishuChannel {
    pub fn new(settings: FeishuSettings, queue: Arc<InboundQueue>) -> Self {
        let tokens = Arc::new(TokenCache::new(settings.app_id.clone(), settings.app_secret.clone()));
        Self {
            settings,
            queue,
            tokens,
            http_client: reqwest::Client::new(),
            server_task: Mutex::new(None),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);

        let addr: SocketAddr = format!("{}:{}", self.settings.bind_host, self.settings.bind_port)
            .parse()
            .map_err(|e| ChannelError::ConfigError(format!("invalid feishu bind address: {e}")))?;

        let state = Arc::new(WebhookState {
            queue: Arc::clone(&self.queue),
            verification_token: self.settings.verification_token.clone(),
            tokens: Arc::clone(&self.tokens),
            http_client: self.http_client.clone(),
            media_root: self.settings.media_root.clone(),
            max_attachment_bytes: self.settings.max_attachment_bytes,
        });

        let listener = TcpListener::bind(addr).await.map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let app = router(state);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await {
                tracing::error!(error = %e, "feishu: webhook server ended with error");
            }
        });

        *self.server_task.lock().unwrap() = Some(handle);
        self.set_status(ChannelStatus::Connected);
        info!(addr = %addr, "feishu: webhook listening");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if let Some(handle) = self.server_task.lock().unwrap().take() {
            handle.abort();
        }
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, intent: &OrchestratorIntent) -> Result<(), ChannelError> {
        match intent {
            OrchestratorIntent::OutboundText { chat_id, text, reply_to, .. } => {
                send::send_text(&self.http_client, &self.tokens, chat_id.as_str(), text, reply_to.as_ref().map(|m| m.as_str()))
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::OutboundMedia { chat_id, path, mime_type, .. } => {
                let Some(path) = path else {
                    return Err(ChannelError::SendFailed("outbound media intent missing path".to_string()));
                };
                send::send_media(&self.http_client, &self.tokens, chat_id.as_str(), path, mime_type.as_deref())
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::Reaction { .. } => {
                // Feishu's reaction API targets a message, not a chat, and
                // isn't wired up yet — no counterpart in the current intents.
                Ok(())
            }
            OrchestratorIntent::Typing { .. } => {
                // Feishu has no typing-indicator API for bots.
                Ok(())
            }
            OrchestratorIntent::MemoryCapture { .. } | OrchestratorIntent::MetricEvent { .. } => Ok(()),
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
