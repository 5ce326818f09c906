use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use conduit_bridge::{WhatsAppBridgeSettings, WhatsAppChannel};
use conduit_channels::{ChannelManager, ChatDispatch, InboundQueue};
use conduit_core::config::{ConduitConfig, DEFAULT_CHAT_DISPATCH_LANE_CAPACITY, DEFAULT_INBOUND_QUEUE_CAPACITY};
use conduit_discord::{DiscordChannel, DiscordSettings};
use conduit_feishu::{FeishuChannel, FeishuSettings};
use conduit_telegram::{TelegramChannel, TelegramSettings};

mod app;
mod bootstrap;
mod http;
mod orchestrator;

const BRIDGE_RAW_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config.json (never hot-reloaded, unlike policy.json — see
    // conduit-policy for the reloadable counterpart): explicit path >
    // CONDUIT_CONFIG env > ~/.conduit/config.json.
    let config_path = std::env::var("CONDUIT_CONFIG").ok();
    let config = ConduitConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        ConduitConfig::default()
    });

    let built = bootstrap::bootstrap(&config)?;

    let inbound = Arc::new(InboundQueue::new(DEFAULT_INBOUND_QUEUE_CAPACITY));
    let dispatch = Arc::new(ChatDispatch::new(DEFAULT_CHAT_DISPATCH_LANE_CAPACITY));
    let mut channels = ChannelManager::new();

    if !config.bridge.token.is_empty() {
        if let Err(e) = config.bridge.validate() {
            warn!(error = %e, "whatsapp bridge misconfigured, skipping registration");
        } else {
            let (_raw_tx, raw_rx) = mpsc::channel(BRIDGE_RAW_CHANNEL_CAPACITY);
            let transport = Arc::new(conduit_bridge::transport::NullTransport::new("default"));
            let settings = WhatsAppBridgeSettings {
                bind_host: config.bridge.host.clone(),
                bind_port: config.bridge.port,
                token: config.bridge.token.clone(),
                account_id: "default".to_string(),
                incoming_media_root: config.media.incoming_dir.clone().into(),
                outgoing_media_root: config.media.outgoing_dir.clone().into(),
                bridge: conduit_bridge::session::BridgeSettings {
                    accept_from_me: config.bridge.accept_from_me,
                    read_receipts: config.bridge.read_receipts,
                    persist_inbound_audio: config.bridge.persist_inbound_audio,
                    persist_inbound_video: false,
                    persist_inbound_sticker: false,
                    self_jids: Vec::new(),
                    self_tokens: Vec::new(),
                },
            };
            channels.register(Box::new(WhatsAppChannel::new(settings, transport, raw_rx, Arc::clone(&inbound))));
        }
    }

    if let Some(telegram) = &config.channels.telegram {
        let settings = TelegramSettings {
            bot_token: telegram.bot_token.clone(),
            max_attachment_bytes: conduit_core::config::DEFAULT_MAX_ATTACHMENT_BYTES,
            media_root: config.media.incoming_dir.clone().into(),
        };
        channels.register(Box::new(TelegramChannel::new(settings, Arc::clone(&inbound))));
    }

    if let Some(discord) = &config.channels.discord {
        let settings = DiscordSettings {
            bot_token: discord.bot_token.clone(),
            max_attachment_bytes: conduit_core::config::DEFAULT_MAX_ATTACHMENT_BYTES,
            media_root: config.media.incoming_dir.clone().into(),
        };
        channels.register(Box::new(DiscordChannel::new(settings, Arc::clone(&inbound))));
    }

    if let Some(feishu) = &config.channels.feishu {
        let settings = FeishuSettings {
            app_id: feishu.app_id.clone(),
            app_secret: feishu.app_secret.clone(),
            verification_token: feishu.verification_token.clone(),
            bind_host: config.gateway.bind.clone(),
            bind_port: config.gateway.port + 1,
            max_attachment_bytes: conduit_core::config::DEFAULT_MAX_ATTACHMENT_BYTES,
            media_root: config.media.incoming_dir.clone().into(),
        };
        channels.register(Box::new(FeishuChannel::new(settings, Arc::clone(&inbound))));
    }

    channels.connect_all().await;
    let channels = Arc::new(channels);

    tokio::spawn(orchestrator::run(
        Arc::clone(&inbound),
        Arc::clone(&dispatch),
        Arc::clone(&built.pipeline),
        Arc::clone(&built.deps),
        Arc::clone(&channels),
        built.shutdown.clone(),
    ));

    let state = Arc::new(app::AppState {
        config: config.clone(),
        pipeline: built.pipeline,
        deps: built.deps,
        archive: built.archive,
        sessions: built.sessions,
        channels: Arc::clone(&channels),
        shutdown: built.shutdown.clone(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!(%addr, "conduit gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining in-flight pipelines");
        })
        .await?;

    built.shutdown.cancel();
    Ok(())
}
