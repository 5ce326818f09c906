use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

// Bridge wire-protocol constants — not configurable, load-bearing for compatibility.
pub const BRIDGE_PROTOCOL_VERSION: u32 = 2;
pub const BRIDGE_MAX_COMMAND_SIZE_BYTES: usize = 256 * 1024;
pub const BRIDGE_MAX_OUTBOUND_BUFFERED_BYTES: usize = 2 * 1024 * 1024;
pub const BRIDGE_MAX_INFLIGHT_COMMANDS: usize = 20;

// Orchestrator-level dedup.
pub const PIPELINE_DEDUP_TTL_SECS: u64 = 600;
pub const PIPELINE_DEDUP_MAX_ENTRIES: usize = 5_000;

// Reply/ambient context window defaults.
pub const DEFAULT_REPLY_CONTEXT_WINDOW_LIMIT: usize = 6;
pub const DEFAULT_AMBIENT_WINDOW_LIMIT: usize = 8;

// Bridge-side caches.
pub const BRIDGE_DEDUP_TTL_SECS: u64 = 1200;
pub const BRIDGE_DEDUP_MAX_ENTRIES: usize = 5_000;
pub const BRIDGE_QUOTE_CACHE_TTL_SECS: u64 = 1200;
pub const BRIDGE_QUOTE_CACHE_MAX_ENTRIES: usize = 2_000;
pub const BRIDGE_OUTBOUND_SELF_TTL_SECS: u64 = 600;
pub const BRIDGE_OUTBOUND_SELF_MAX_ENTRIES: usize = 5_000;

// Reconnect supervisor.
pub const BRIDGE_RECONNECT_INITIAL_SECS: u64 = 1;
pub const BRIDGE_RECONNECT_CAP_SECS: u64 = 30;
pub const BRIDGE_RECONNECT_MULTIPLIER: f64 = 2.0;
pub const BRIDGE_RECONNECT_JITTER_FRACTION: f64 = 0.25;
pub const BRIDGE_RECONNECT_MAX_ATTEMPTS: u32 = 30;
pub const BRIDGE_QR_FRESHNESS_SECS: u64 = 120;

// Archive retention default.
pub const ARCHIVE_RETENTION_DAYS: i64 = 30;

// Inbound attachment size cap shared by every channel adapter, absent a
// per-deployment override.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

// Bus sizing.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 1_000;
pub const DEFAULT_CHAT_DISPATCH_LANE_CAPACITY: usize = 64;

/// Top-level runtime configuration: `config.json` + `CONDUIT_*` env overrides.
///
/// Loaded once at startup and never hot-reloaded — see the distinction from
/// `policy.json` (hot-reloaded, strict-schema, owned by `conduit-policy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            bridge: BridgeConfig::default(),
            storage: StorageConfig::default(),
            media: MediaConfig::default(),
            channels: ChannelsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// The gateway process's own health-probe listener. Separate
/// from [`BridgeConfig`], which binds the WhatsApp control-plane socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_host")]
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// Shared secret every bridge command must present. Must be non-empty;
    /// the bridge refuses to start otherwise.
    pub token: String,
    #[serde(default)]
    pub accept_from_me: bool,
    #[serde(default = "bool_true")]
    pub read_receipts: bool,
    #[serde(default)]
    pub persist_inbound_audio: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_bridge_host(),
            port: default_bridge_port(),
            token: String::new(),
            accept_from_me: false,
            read_receipts: true,
            persist_inbound_audio: false,
        }
    }
}

impl BridgeConfig {
    /// Validates the loopback-only and non-empty-token constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.token.trim().is_empty() {
            return Err("BRIDGE_TOKEN must not be empty".to_string());
        }
        match self.host.parse::<IpAddr>() {
            Ok(addr) if addr.is_loopback() => Ok(()),
            Ok(addr) => Err(format!("BRIDGE_HOST must be loopback, got {addr}")),
            Err(_) => Err(format!("BRIDGE_HOST is not a valid IP: {}", self.host)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_config_root")]
    pub config_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            config_root: default_config_root(),
        }
    }
}

impl StorageConfig {
    pub fn policy_path(&self) -> String {
        format!("{}/policy.json", self.config_root)
    }
    pub fn config_path(&self) -> String {
        format!("{}/config.json", self.config_root)
    }
    pub fn sessions_dir(&self) -> String {
        format!("{}/sessions", self.config_root)
    }
    pub fn archive_db_path(&self) -> String {
        format!("{}/inbound/reply_context.db", self.config_root)
    }
    pub fn memory_db_path(&self) -> String {
        format!("{}/memory/memory.db", self.config_root)
    }
    pub fn whatsapp_auth_dir(&self) -> String {
        format!("{}/whatsapp-auth", self.config_root)
    }
    pub fn security_rules_path(&self) -> String {
        format!("{}/security_rules.json", self.config_root)
    }
    pub fn policy_backups_dir(&self) -> String {
        format!("{}/policy_backups", self.config_root)
    }
    pub fn policy_audit_db_path(&self) -> String {
        format!("{}/policy_audit.db", self.config_root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_incoming_dir")]
    pub incoming_dir: String,
    #[serde(default = "default_media_outgoing_dir")]
    pub outgoing_dir: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            incoming_dir: default_media_incoming_dir(),
            outgoing_dir: default_media_outgoing_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    pub feishu: Option<FeishuConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default)]
    pub encrypt_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub capture_channels: Vec<String>,
    #[serde(default)]
    pub capture_assistant: bool,
    /// When set, extraction drops non-owner `semantic`/`procedural` candidates.
    #[serde(default)]
    pub owner_only_preference: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_salience")]
    pub min_salience: f64,
    #[serde(default = "default_recall_half_life_days")]
    pub recall_half_life_days: f64,
    #[serde(default = "default_weight_lex")]
    pub weight_lexical: f64,
    #[serde(default = "default_weight_vec")]
    pub weight_vector: f64,
    #[serde(default = "default_weight_sal")]
    pub weight_salience: f64,
    #[serde(default = "default_weight_rec")]
    pub weight_recency: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capture_channels: Vec::new(),
            capture_assistant: false,
            owner_only_preference: false,
            min_confidence: default_min_confidence(),
            min_salience: default_min_salience(),
            recall_half_life_days: default_recall_half_life_days(),
            weight_lexical: default_weight_lex(),
            weight_vector: default_weight_vec(),
            weight_salience: default_weight_sal(),
            weight_recency: default_weight_rec(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_gateway_port() -> u16 {
    8080
}
fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bridge_port() -> u16 {
    8765
}
fn default_config_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conduit", home)
}
fn default_media_incoming_dir() -> String {
    format!("{}/media/incoming", default_config_root())
}
fn default_media_outgoing_dir() -> String {
    format!("{}/media/outgoing", default_config_root())
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_min_salience() -> f64 {
    0.3
}
fn default_recall_half_life_days() -> f64 {
    30.0
}
fn default_weight_lex() -> f64 {
    0.35
}
fn default_weight_vec() -> f64 {
    0.35
}
fn default_weight_sal() -> f64 {
    0.15
}
fn default_weight_rec() -> f64 {
    0.15
}

impl ConduitConfig {
    /// Load `config.json` (or the explicit path given) merged with
    /// `CONDUIT_*` environment overrides. Never hot-reloaded — see
    /// the policy snapshot loader in `conduit-policy` for the reloadable
    /// counterpart.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| StorageConfig::default().config_path());

        let config: ConduitConfig = Figment::new()
            .merge(Json::file(&path))
            .merge(Env::prefixed("CONDUIT_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConduitError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_config_rejects_empty_token() {
        let cfg = BridgeConfig {
            token: "".to_string(),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bridge_config_rejects_non_loopback_host() {
        let cfg = BridgeConfig {
            token: "secret".to_string(),
            host: "0.0.0.0".to_string(),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bridge_config_accepts_loopback_with_token() {
        let cfg = BridgeConfig {
            token: "secret".to_string(),
            ..BridgeConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn gateway_config_defaults_to_loopback() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn memory_weights_default_sum_to_one() {
        let cfg = MemoryConfig::default();
        let sum = cfg.weight_lexical + cfg.weight_vector + cfg.weight_salience + cfg.weight_recency;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
