//! `WhatsAppBridgeSession`: owns the caches, QR/auth latch, and
//! reconnect counter that sit alongside the live transport connection.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use conduit_core::cache::{TtlLruCache, TtlLruSet};
use conduit_core::config::{
    BRIDGE_DEDUP_TTL_SECS, BRIDGE_DEDUP_MAX_ENTRIES, BRIDGE_OUTBOUND_SELF_MAX_ENTRIES, BRIDGE_OUTBOUND_SELF_TTL_SECS,
    BRIDGE_QR_FRESHNESS_SECS, BRIDGE_QUOTE_CACHE_MAX_ENTRIES, BRIDGE_QUOTE_CACHE_TTL_SECS,
};
use sha2::{Digest, Sha256};

use crate::raw::RawInboundMessage;

/// Tunables the session needs beyond what lives in `conduit_core::config`
/// constants: per-deployment flags from `BridgeConfig` plus media roots.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub accept_from_me: bool,
    pub read_receipts: bool,
    pub persist_inbound_audio: bool,
    pub persist_inbound_video: bool,
    pub persist_inbound_sticker: bool,
    pub self_jids: Vec<String>,
    pub self_tokens: Vec<String>,
}

/// `(chat_jid, message_id) → cached raw message`, used to resolve outbound
/// `replyToMessageId` references into a quoted send.
pub type QuoteCache = TtlLruCache<(String, String), RawInboundMessage>;

pub struct BridgeSession {
    pub settings: BridgeSettings,
    dedup: Mutex<TtlLruSet<String>>,
    quote: Mutex<QuoteCache>,
    outbound_self: Mutex<TtlLruSet<String>>,
    qr: Mutex<Option<(String, Instant)>>,
    reconnect_attempts: AtomicU32,
    dropped_inbound_duplicates: AtomicU64,
}

impl BridgeSession {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            settings,
            dedup: Mutex::new(TtlLruSet::new(Duration::from_secs(BRIDGE_DEDUP_TTL_SECS), BRIDGE_DEDUP_MAX_ENTRIES)),
            quote: Mutex::new(QuoteCache::new(Duration::from_secs(BRIDGE_QUOTE_CACHE_TTL_SECS), BRIDGE_QUOTE_CACHE_MAX_ENTRIES)),
            outbound_self: Mutex::new(TtlLruSet::new(Duration::from_secs(BRIDGE_OUTBOUND_SELF_TTL_SECS), BRIDGE_OUTBOUND_SELF_MAX_ENTRIES)),
            qr: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            dropped_inbound_duplicates: AtomicU64::new(0),
        }
    }

    /// Dedup key is `sha256(chat_jid:message_id)`. Returns
    /// `true` if this is a duplicate (already seen within the TTL window),
    /// incrementing the dropped-duplicates counter as a side effect.
    pub fn check_and_record_inbound(&self, chat_jid: &str, message_id: &str) -> bool {
        let digest = dedup_key(chat_jid, message_id);
        let was_present = self.dedup.lock().unwrap().insert(digest, ());
        if was_present {
            self.dropped_inbound_duplicates.fetch_add(1, Ordering::Relaxed);
        }
        was_present
    }

    pub fn cache_for_quote(&self, chat_jid: &str, message_id: &str, raw: RawInboundMessage) {
        self.quote.lock().unwrap().insert((chat_jid.to_string(), message_id.to_string()), raw);
    }

    pub fn lookup_quote(&self, chat_jid: &str, message_id: &str) -> Option<RawInboundMessage> {
        self.quote.lock().unwrap().get(&(chat_jid.to_string(), message_id.to_string())).cloned()
    }

    /// Record an id this bridge itself sent, for the `fromMe` echo filter.
    pub fn record_outbound_self(&self, message_id: &str) {
        self.outbound_self.lock().unwrap().insert(message_id.to_string(), ());
    }

    pub fn is_own_echo(&self, message_id: &str) -> bool {
        self.outbound_self.lock().unwrap().contains(&message_id.to_string())
    }

    /// Latch a freshly produced QR string for up to `BRIDGE_QR_FRESHNESS_SECS`.
    pub fn latch_qr(&self, qr: String) {
        *self.qr.lock().unwrap() = Some((qr, Instant::now()));
    }

    /// The current QR string, if one was latched within the freshness window.
    pub fn current_qr(&self) -> Option<String> {
        let guard = self.qr.lock().unwrap();
        match &*guard {
            Some((qr, at)) if at.elapsed() < Duration::from_secs(BRIDGE_QR_FRESHNESS_SECS) => Some(qr.clone()),
            _ => None,
        }
    }

    pub fn clear_qr(&self) {
        *self.qr.lock().unwrap() = None;
    }

    pub fn note_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn dropped_inbound_duplicates(&self) -> u64 {
        self.dropped_inbound_duplicates.load(Ordering::Relaxed)
    }

    pub fn dedup_cache_size(&self) -> usize {
        self.dedup.lock().unwrap().len()
    }
}

fn dedup_key(chat_jid: &str, message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{chat_jid}:{message_id}").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BridgeSettings {
        BridgeSettings {
            accept_from_me: false,
            read_receipts: true,
            persist_inbound_audio: false,
            persist_inbound_video: false,
            persist_inbound_sticker: false,
            self_jids: vec![],
            self_tokens: vec![],
        }
    }

    #[test]
    fn second_delivery_of_same_message_is_flagged_duplicate() {
        let session = BridgeSession::new(settings());
        assert!(!session.check_and_record_inbound("c1@g.us", "M1"));
        assert!(session.check_and_record_inbound("c1@g.us", "M1"));
        assert_eq!(session.dropped_inbound_duplicates(), 1);
    }

    #[test]
    fn qr_expires_after_freshness_window() {
        let session = BridgeSession::new(settings());
        assert!(session.current_qr().is_none());
        session.latch_qr("2@ABC...".to_string());
        assert_eq!(session.current_qr(), Some("2@ABC...".to_string()));
        session.clear_qr();
        assert!(session.current_qr().is_none());
    }

    #[test]
    fn outbound_self_cache_recognizes_echo() {
        let session = BridgeSession::new(settings());
        assert!(!session.is_own_echo("OUT1"));
        session.record_outbound_self("OUT1");
        assert!(session.is_own_echo("OUT1"));
    }
}
