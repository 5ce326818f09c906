//! `policy.json` schema. Every nesting level rejects unknown
//! keys at load time per the merge algorithm's rule; a level only ever
//! overrides a field it explicitly sets, never partially (list fields are
//! replaced wholesale, never appended to).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const POLICY_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhoCanTalkMode {
    Everyone,
    Allowlist,
    OwnerOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WhoCanTalk {
    pub mode: WhoCanTalkMode,
    #[serde(default)]
    pub senders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenToReplyMode {
    All,
    Off,
    MentionOnly,
    AllowedSenders,
    OwnerOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WhenToReply {
    pub mode: WhenToReplyMode,
    #[serde(default)]
    pub senders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockedSenders {
    #[serde(default)]
    pub senders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedToolsMode {
    All,
    Allowlist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AllowedTools {
    pub mode: AllowedToolsMode,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceOutputMode {
    Text,
    InKind,
    Always,
    Off,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoiceInput {
    #[serde(default)]
    pub wake_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoiceOutput {
    pub mode: VoiceOutputMode,
    #[serde(default)]
    pub max_sentences: Option<u32>,
    #[serde(default)]
    pub max_chars: Option<u32>,
}

impl Default for VoiceOutput {
    fn default() -> Self {
        Self {
            mode: VoiceOutputMode::Text,
            max_sentences: None,
            max_chars: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoicePolicy {
    #[serde(default)]
    pub input: VoiceInput,
    #[serde(default)]
    pub output: VoiceOutput,
}

/// One level of the policy hierarchy (`defaults`, a channel's `default`, or
/// one chat). Every field is optional: a level that doesn't set a field
/// inherits the value from the next-less-specific level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyLevel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who_can_talk: Option<WhoCanTalk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_to_reply: Option<WhenToReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_senders: Option<BlockedSenders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<AllowedTools>,
    /// `null` clears an inherited persona; absent inherits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_file: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoicePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelPolicy {
    #[serde(default)]
    pub default: PolicyLevel,
    #[serde(default)]
    pub chats: HashMap<String, PolicyLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default = "bool_true")]
    pub reload_on_change: bool,
    #[serde(default = "default_rate_limit")]
    pub admin_command_rate_limit_per_minute: u32,
    #[serde(default)]
    pub admin_require_confirm_for_risky: bool,
    #[serde(default = "default_reload_interval")]
    pub reload_check_interval_seconds: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reload_on_change: true,
            admin_command_rate_limit_per_minute: default_rate_limit(),
            admin_require_confirm_for_risky: false,
            reload_check_interval_seconds: default_reload_interval(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_rate_limit() -> u32 {
    10
}
fn default_reload_interval() -> f64 {
    2.0
}

/// The full on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicySpec {
    pub version: u32,
    /// `channel -> list of owner sender ids`.
    #[serde(default)]
    pub owners: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub defaults: PolicyLevel,
    #[serde(default)]
    pub channels: HashMap<String, ChannelPolicy>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self {
            version: POLICY_SCHEMA_VERSION,
            owners: HashMap::new(),
            defaults: PolicyLevel::default(),
            channels: HashMap::new(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl PolicySpec {
    /// Reload-interval floor of 0.1s.
    pub fn reload_check_interval(&self) -> f64 {
        self.runtime.reload_check_interval_seconds.max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_spec_round_trips_through_json() {
        let json = r#"{
            "version": 2,
            "owners": {"whatsapp": ["+15551234567"]},
            "defaults": {"whoCanTalk": {"mode": "everyone"}},
            "channels": {
                "whatsapp": {
                    "default": {"whenToReply": {"mode": "mention_only"}},
                    "chats": {}
                }
            },
            "runtime": {"reloadOnChange": true, "adminCommandRateLimitPerMinute": 5}
        }"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.version, 2);
        assert_eq!(spec.owners["whatsapp"], vec!["+15551234567".to_string()]);
        let serialized = serde_json::to_string(&spec).unwrap();
        let back: PolicySpec = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.runtime.admin_command_rate_limit_per_minute, 5);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let json = r#"{"version": 2, "bogusKey": true}"#;
        let result: Result<PolicySpec, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_nested_key_is_rejected() {
        let json = r#"{
            "version": 2,
            "defaults": {"whoCanTalk": {"mode": "everyone", "bogus": 1}}
        }"#;
        let result: Result<PolicySpec, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn persona_file_null_is_distinguishable_from_absent() {
        let json = r#"{"version": 2, "defaults": {"personaFile": null}}"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.defaults.persona_file, Some(None));

        let json_absent = r#"{"version": 2, "defaults": {}}"#;
        let spec_absent: PolicySpec = serde_json::from_str(json_absent).unwrap();
        assert_eq!(spec_absent.defaults.persona_file, None);
    }
}
