use std::sync::Arc;

use axum::{routing::get, Router};
use conduit_archive::ArchiveStore;
use conduit_channels::ChannelManager;
use conduit_core::config::ConduitConfig;
use conduit_pipeline::{Pipeline, PipelineDeps};
use conduit_sessions::SessionStore;
use tokio_util::sync::CancellationToken;

/// Central shared state — passed as `Arc<AppState>` to the health endpoint
/// and the orchestrator loop.
pub struct AppState {
    pub config: ConduitConfig,
    pub pipeline: Arc<Pipeline>,
    pub deps: Arc<PipelineDeps>,
    pub archive: Arc<ArchiveStore>,
    #[allow(dead_code)]
    pub sessions: Arc<SessionStore>,
    pub channels: Arc<ChannelManager>,
    pub shutdown: CancellationToken,
}

/// Assemble the gateway's own (minimal) Axum router. Every channel that
/// needs an inbound HTTP surface (the WhatsApp bridge's control plane,
/// Feishu's webhook) binds and serves its own listener from inside
/// `Channel::connect` — this router only exposes the process-wide health
/// probe.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
