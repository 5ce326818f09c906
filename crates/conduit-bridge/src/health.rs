//! Builds the `health` command's response payload.

use conduit_core::config::BRIDGE_PROTOCOL_VERSION;
use conduit_protocol::event::{DedupeHealth, HealthPayload, QueueHealth, WhatsAppHealth};

use crate::server::BridgeServer;

pub fn build_health_payload(server: &BridgeServer) -> HealthPayload {
    let dropped = server.session.dropped_inbound_duplicates();
    let dedupe_size = server.session.dedup_cache_size();

    HealthPayload {
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: BRIDGE_PROTOCOL_VERSION,
        bridge_version: server.bridge_version.clone(),
        build_id: server.build_id.clone(),
        account_id: server.account_id.clone(),
        whatsapp: WhatsAppHealth {
            connected: server.transport.is_connected(),
            running: true,
            reconnect_attempts: server.session.reconnect_attempts(),
            last_disconnect_status: None,
            last_error: None,
            last_message_at: None,
            dropped_inbound_duplicates: dropped,
            dedupe_cache_size: dedupe_size,
        },
        queue: QueueHealth {
            clients: server.client_count(),
            inflight: 0,
            dropped: 0,
        },
        dedupe: DedupeHealth {
            dropped_inbound_duplicates: dropped,
            dedupe_cache_size: dedupe_size,
        },
    }
}
