use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// Current version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit hash embedded at compile time by build.rs.
pub const GIT_SHA: &str = env!("CONDUIT_GIT_SHA");

/// GET /health — liveness probe. Reports per-channel connection status
/// and whether a graceful drain is in progress.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels: Vec<Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(name, status)| json!({ "name": name, "status": status }))
        .collect();

    Json(json!({
        "status": if state.shutdown.is_cancelled() { "draining" } else { "ok" },
        "version": VERSION,
        "git_sha": GIT_SHA,
        "channels": channels,
    }))
}
