//! Loopback-only WebSocket server speaking the v2 bridge protocol.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{ws::Message as WsMessage, ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use conduit_core::config::{BRIDGE_MAX_COMMAND_SIZE_BYTES, BRIDGE_MAX_INFLIGHT_COMMANDS, BRIDGE_MAX_OUTBOUND_BUFFERED_BYTES};
use conduit_core::config::BRIDGE_PROTOCOL_VERSION;
use conduit_protocol::command::{Command, CommandEnvelope};
use conduit_protocol::event::{EventEnvelope, EventKind, HealthPayload};
use conduit_protocol::{auth, ProtocolError};

use crate::dispatch::dispatch_command;
use crate::health::build_health_payload;
use crate::session::BridgeSession;
use crate::transport::WhatsAppTransport;

/// Server-wide state shared across every connection.
pub struct BridgeServer {
    pub session: Arc<BridgeSession>,
    pub transport: Arc<dyn WhatsAppTransport>,
    pub token: String,
    pub account_id: String,
    pub bridge_version: String,
    pub build_id: String,
    client_count: AtomicUsize,
}

impl BridgeServer {
    pub fn new(session: Arc<BridgeSession>, transport: Arc<dyn WhatsAppTransport>, token: String, account_id: String) -> Self {
        Self {
            session,
            transport,
            token,
            account_id,
            bridge_version: env!("CARGO_PKG_VERSION").to_string(),
            build_id: "dev".to_string(),
            client_count: AtomicUsize::new(0),
        }
    }

    pub fn health(&self) -> HealthPayload {
        build_health_payload(self)
    }
}

pub fn router(state: Arc<BridgeServer>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<BridgeServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, addr, state))
}

/// Loopback enforcement: any remote address outside 127.0.0.0/8,
/// ::1, or ::ffff:127.0.0.0/104 is rejected before a single command is
/// dispatched.
fn is_loopback(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().map(|v4| v4.is_loopback()).unwrap_or(false),
    }
}

async fn handle_connection(socket: WebSocket, addr: SocketAddr, state: Arc<BridgeServer>) {
    let (mut sink, mut stream) = socket.split();

    if !is_loopback(&addr) {
        warn!(%addr, "bridge: rejecting non-loopback connection");
        let err = ProtocolError::Auth.to_wire(&state.token);
        let ev = EventEnvelope::error(state.account_id.clone(), err, None);
        let _ = sink.send(WsMessage::Text(serde_json::to_string(&ev).unwrap_or_default())).await;
        let _ = sink.close().await;
        return;
    }

    state.client_count.fetch_add(1, Ordering::Relaxed);
    let inflight = Arc::new(Semaphore::new(BRIDGE_MAX_INFLIGHT_COMMANDS));
    let outbound_gate = Arc::new(OutboundGate::new());

    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let gate_for_writer = Arc::clone(&outbound_gate);
    let writer = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            let len = payload.len();
            if sink.send(WsMessage::Text(payload)).await.is_err() {
                break;
            }
            gate_for_writer.release(len);
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let WsMessage::Text(text) = msg else { continue };

        if text.len() > BRIDGE_MAX_COMMAND_SIZE_BYTES {
            let err = ProtocolError::PayloadTooLarge { size: text.len(), max: BRIDGE_MAX_COMMAND_SIZE_BYTES }.to_wire(&state.token);
            enqueue(&out_tx, &outbound_gate, EventEnvelope::error(state.account_id.clone(), err, None));
            continue;
        }

        let Ok(permit) = Arc::clone(&inflight).try_acquire_owned() else {
            let err = ProtocolError::QueueOverflow.to_wire(&state.token);
            enqueue(&out_tx, &outbound_gate, EventEnvelope::error(state.account_id.clone(), err, None));
            continue;
        };

        let state = Arc::clone(&state);
        let out_tx = out_tx.clone();
        let outbound_gate = Arc::clone(&outbound_gate);
        tokio::spawn(async move {
            let _permit = permit;
            handle_command_text(&text, &state, &out_tx, &outbound_gate).await;
        });
    }

    drop(out_tx);
    let _ = writer.await;
    state.client_count.fetch_sub(1, Ordering::Relaxed);
    info!(%addr, "bridge: connection closed");
}

async fn handle_command_text(text: &str, state: &Arc<BridgeServer>, out_tx: &mpsc::Sender<String>, gate: &Arc<OutboundGate>) {
    let envelope: CommandEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            let err = ProtocolError::Schema(e.to_string()).to_wire(&state.token);
            enqueue(out_tx, gate, EventEnvelope::error(state.account_id.clone(), err, None));
            return;
        }
    };

    if envelope.version != BRIDGE_PROTOCOL_VERSION {
        let err = ProtocolError::ProtocolVersion(envelope.version).to_wire(&state.token);
        enqueue(out_tx, gate, EventEnvelope::error(state.account_id.clone(), err, envelope.request_id));
        return;
    }

    if !auth::tokens_match(&envelope.token, &state.token) {
        let err = ProtocolError::Auth.to_wire(&state.token);
        enqueue(out_tx, gate, EventEnvelope::error(state.account_id.clone(), err, envelope.request_id));
        return;
    }

    let request_id = envelope.request_id.clone();
    let command: Command = match conduit_protocol::parse_command(&envelope) {
        Ok(c) => c,
        Err(e) => {
            let err = e.to_wire(&state.token);
            enqueue(out_tx, gate, EventEnvelope::error(state.account_id.clone(), err, request_id));
            return;
        }
    };

    let events = dispatch_command(state, command, request_id.clone()).await;
    for ev in events {
        enqueue(out_tx, gate, ev);
    }
}

fn enqueue(out_tx: &mpsc::Sender<String>, gate: &Arc<OutboundGate>, event: EventEnvelope) {
    let payload = serde_json::to_string(&event).unwrap_or_else(|_| json!({"type": "error"}).to_string());
    if !gate.try_reserve(payload.len()) {
        warn!("bridge: outbound buffer full, dropping event");
        return;
    }
    if out_tx.try_send(payload.clone()).is_err() {
        gate.release(payload.len());
        warn!("bridge: outbound channel closed or full, dropping event");
    }
}

/// Approximates the "max 2 MB outbound buffered bytes" per-connection limit:
/// a byte-budget reservation around the otherwise message-counted mpsc
/// channel feeding the connection's writer task.
struct OutboundGate {
    buffered_bytes: AtomicUsize,
    dropped: AtomicU64,
}

impl OutboundGate {
    fn new() -> Self {
        Self { buffered_bytes: AtomicUsize::new(0), dropped: AtomicU64::new(0) }
    }

    fn try_reserve(&self, n: usize) -> bool {
        loop {
            let cur = self.buffered_bytes.load(Ordering::Acquire);
            if cur + n > BRIDGE_MAX_OUTBOUND_BUFFERED_BYTES {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            if self
                .buffered_bytes
                .compare_exchange(cur, cur + n, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, n: usize) {
        self.buffered_bytes.fetch_sub(n, Ordering::AcqRel);
    }
}

impl BridgeServer {
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_v4_accepted() {
        assert!(is_loopback(&"127.0.0.1:9999".parse().unwrap()));
    }

    #[test]
    fn loopback_v6_accepted() {
        assert!(is_loopback(&"[::1]:9999".parse().unwrap()));
    }

    #[test]
    fn non_loopback_rejected() {
        assert!(!is_loopback(&"192.168.1.5:9999".parse().unwrap()));
    }

    #[test]
    fn outbound_gate_drops_past_cap() {
        let gate = OutboundGate::new();
        assert!(gate.try_reserve(BRIDGE_MAX_OUTBOUND_BUFFERED_BYTES - 1));
        assert!(!gate.try_reserve(10));
    }
}
