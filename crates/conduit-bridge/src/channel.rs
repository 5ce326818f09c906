//! Wraps the bridge session, transport, loopback server, and inbound
//! processing loop behind [`conduit_channels::Channel`] so the WhatsApp
//! bridge can be registered and managed uniformly alongside the other
//! channel adapters.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conduit_channels::{Channel, ChannelError, ChannelStatus, InboundQueue};
use conduit_core::types::OrchestratorIntent;

use crate::processing::{process_inbound, Processed};
use crate::raw::RawInboundMessage;
use crate::reconnect;
use crate::server::{router, BridgeServer};
use crate::session::{BridgeSession, BridgeSettings};
use crate::transport::{MediaSource, PresenceState, WhatsAppTransport};

pub struct WhatsAppBridgeSettings {
    pub bind_host: String,
    pub bind_port: u16,
    pub token: String,
    pub account_id: String,
    pub incoming_media_root: PathBuf,
    pub outgoing_media_root: PathBuf,
    pub bridge: BridgeSettings,
}

/// The WhatsApp channel adapter. Differs from the other channel adapters
/// in that it also exposes a loopback control-plane server — `send`
/// here calls the transport directly, matching the outbound path a control
/// client would otherwise drive through that same server.
pub struct WhatsAppChannel {
    settings: WhatsAppBridgeSettings,
    transport: Arc<dyn WhatsAppTransport>,
    session: Arc<BridgeSession>,
    queue: Arc<InboundQueue>,
    raw_rx: Mutex<Option<mpsc::Receiver<RawInboundMessage>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    status: Mutex<ChannelStatus>,
    http_client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(
        settings: WhatsAppBridgeSettings,
        transport: Arc<dyn WhatsAppTransport>,
        raw_rx: mpsc::Receiver<RawInboundMessage>,
        queue: Arc<InboundQueue>,
    ) -> Self {
        let session = Arc::new(BridgeSession::new(settings.bridge.clone()));
        Self {
            settings,
            transport,
            session,
            queue,
            raw_rx: Mutex::new(Some(raw_rx)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            status: Mutex::new(ChannelStatus::Disconnected),
            http_client: reqwest::Client::new(),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);

        let server = Arc::new(BridgeServer::new(
            Arc::clone(&self.session),
            Arc::clone(&self.transport),
            self.settings.token.clone(),
            self.settings.account_id.clone(),
        ));

        let addr: SocketAddr = format!("{}:{}", self.settings.bind_host, self.settings.bind_port)
            .parse()
            .map_err(|e| ChannelError::ConfigError(format!("invalid bridge bind address: {e}")))?;
        if !addr.ip().is_loopback() {
            return Err(ChannelError::ConfigError("bridge host must be loopback".to_string()));
        }

        let app = router(server);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await {
                warn!(error = %e, "bridge server exited");
            }
        });

        // Inbound processing loop: drains raw messages handed over by the
        // transport, runs them through the 14-step pipeline, and publishes
        // canonical messages onto the shared inbound queue.
        let Some(mut raw_rx) = self.raw_rx.lock().unwrap().take() else {
            return Err(ChannelError::ConfigError("whatsapp channel already connected".to_string()));
        };
        let session = Arc::clone(&self.session);
        let queue = Arc::clone(&self.queue);
        let incoming_root = self.settings.incoming_media_root.clone();
        let http_client = self.http_client.clone();
        let read_receipts = self.session.settings.read_receipts;
        let transport = Arc::clone(&self.transport);
        let shutdown = self.shutdown.clone();
        let processing_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = raw_rx.recv() => {
                        let Some(raw) = msg else { break };
                        let message_id = raw.key.id.clone();
                        let chat_jid = raw.key.remote_jid.clone();
                        match process_inbound("whatsapp", &session, &incoming_root, raw, &http_client).await {
                            Processed::Message(core_msg) => {
                                if read_receipts {
                                    // best-effort: read receipts are sent via presence on the same chat.
                                    let _ = transport.presence_update(PresenceState::Available, Some(&chat_jid)).await;
                                }
                                queue.publish(core_msg).await;
                            }
                            Processed::Dropped(reason) => {
                                info!(reason, message_id, "whatsapp: inbound message dropped");
                            }
                        }
                    }
                }
            }
        });

        let session_for_supervisor = Arc::clone(&self.session);
        let transport_for_supervisor = Arc::clone(&self.transport);
        let supervisor_shutdown = self.shutdown.clone();
        let supervisor_task = tokio::spawn(async move {
            reconnect::supervise(session_for_supervisor, supervisor_shutdown, || {
                let transport = Arc::clone(&transport_for_supervisor);
                async move { transport.connect().await.map_err(|e| crate::error::BridgeError::Transport(e.to_string())) }
            })
            .await;
        });

        self.tasks.lock().unwrap().extend([server_task, processing_task, supervisor_task]);
        self.set_status(ChannelStatus::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        // `/panic` and shutdown both drain gracefully —
        // cancel the loops and let in-flight work finish rather than
        // aborting tasks mid-write.
        self.shutdown.cancel();
        for task in self.tasks.lock().unwrap().drain(..) {
            let _ = task.await;
        }
        let _ = self.transport.disconnect().await;
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, intent: &OrchestratorIntent) -> Result<(), ChannelError> {
        match intent {
            OrchestratorIntent::OutboundText { chat_id, text, reply_to, .. } => {
                let quoted = reply_to.as_ref().and_then(|id| self.session.lookup_quote(chat_id.as_str(), id.as_str()));
                self.transport
                    .send_text(chat_id.as_str(), text, quoted.as_ref())
                    .await
                    .map(|id| self.session.record_outbound_self(&id))
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::OutboundMedia { chat_id, path, mime_type, caption, reply_to, .. } => {
                let Some(path) = path else {
                    return Err(ChannelError::SendFailed("outbound media intent missing path".to_string()));
                };
                let quoted = reply_to.as_ref().and_then(|id| self.session.lookup_quote(chat_id.as_str(), id.as_str()));
                self.transport
                    .send_media(chat_id.as_str(), MediaSource::Path(path.into()), mime_type.as_deref(), None, caption.as_deref(), quoted.as_ref())
                    .await
                    .map(|id| self.session.record_outbound_self(&id))
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::Reaction { chat_id, message_id, emoji, .. } => self
                .transport
                .react(chat_id.as_str(), message_id.as_str(), emoji, None, true)
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string())),
            OrchestratorIntent::Typing { chat_id, state, .. } => {
                let presence = match state {
                    conduit_core::types::TypingState::On => PresenceState::Composing,
                    conduit_core::types::TypingState::Off => PresenceState::Paused,
                };
                self.transport
                    .presence_update(presence, Some(chat_id.as_str()))
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::MemoryCapture { .. } | OrchestratorIntent::MetricEvent { .. } => Ok(()),
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
