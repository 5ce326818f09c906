//! Policy evaluation and hot reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use conduit_core::types::PolicyDecision;
use tracing::{instrument, warn};

use crate::error::{PolicyError, Result};
use crate::identity;
use crate::schema::{
    AllowedTools, AllowedToolsMode, PolicyLevel, PolicySpec, VoicePolicy, WhenToReply,
    WhenToReplyMode, WhoCanTalk, WhoCanTalkMode,
};

/// A request to evaluate policy for one inbound message.
/// `voice_wake_phrase_matched` carries one extra signal beyond the merged
/// policy itself: the WhatsApp group wake-phrase rule needs to
/// know whether the inbound voice transcript already matched a configured
/// wake phrase, which the pipeline computes before calling into the engine
/// since only it has the transcript and the chat's `voice.input.wakePhrases`
/// list at hand.
#[derive(Debug, Clone)]
pub struct EvalRequest<'a> {
    pub channel: &'a str,
    pub chat_id: &'a str,
    pub sender: &'a str,
    pub is_group: bool,
    pub mentioned_bot: bool,
    pub reply_to_bot: bool,
    pub voice_wake_phrase_matched: bool,
}

/// The fully merged policy in effect for one `(channel, chat_id)` pair.
#[derive(Debug, Clone)]
pub struct ResolvedLevel {
    pub who_can_talk: WhoCanTalk,
    pub when_to_reply: WhenToReply,
    pub blocked_senders: Vec<String>,
    pub allowed_tools: AllowedTools,
    pub persona_file: Option<String>,
    pub voice: VoicePolicy,
}

impl Default for ResolvedLevel {
    fn default() -> Self {
        Self {
            who_can_talk: WhoCanTalk {
                mode: WhoCanTalkMode::Everyone,
                senders: Vec::new(),
            },
            when_to_reply: WhenToReply {
                mode: WhenToReplyMode::All,
                senders: Vec::new(),
            },
            blocked_senders: Vec::new(),
            allowed_tools: AllowedTools {
                mode: AllowedToolsMode::All,
                tools: Vec::new(),
                deny: Vec::new(),
            },
            persona_file: None,
            voice: VoicePolicy::default(),
        }
    }
}

fn apply_level(base: &mut ResolvedLevel, level: &PolicyLevel) {
    if let Some(w) = &level.who_can_talk {
        base.who_can_talk = w.clone();
    }
    if let Some(w) = &level.when_to_reply {
        base.when_to_reply = w.clone();
    }
    if let Some(b) = &level.blocked_senders {
        base.blocked_senders = b.senders.clone();
    }
    if let Some(t) = &level.allowed_tools {
        base.allowed_tools = t.clone();
    }
    if let Some(p) = &level.persona_file {
        base.persona_file = p.clone();
    }
    if let Some(v) = &level.voice {
        base.voice = v.clone();
    }
}

/// Merge `defaults -> channels[ch].default -> channels[ch].chats[id]`, each
/// level's explicitly-set fields fully replacing the previous value.
pub fn resolve(spec: &PolicySpec, channel: &str, chat_id: &str) -> ResolvedLevel {
    let mut resolved = ResolvedLevel::default();
    apply_level(&mut resolved, &spec.defaults);
    if let Some(ch) = spec.channels.get(channel) {
        apply_level(&mut resolved, &ch.default);
        if let Some(chat) = ch.chats.get(chat_id) {
            apply_level(&mut resolved, chat);
        }
    }
    resolved
}

/// Immutable, atomically-swappable parsed policy document plus whatever
/// bookkeeping is cheap to precompute at load time.
pub struct Snapshot {
    pub spec: PolicySpec,
}

impl Snapshot {
    fn new(spec: PolicySpec) -> Self {
        Self { spec }
    }

    pub fn owners(&self, channel: &str) -> HashSet<String> {
        self.spec
            .owners
            .get(channel)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect()
    }
}

/// Deterministic, hot-reloadable policy engine.
///
/// `snapshot` is an [`ArcSwap`] so `evaluate`/`explain` never take a lock on
/// the read path — `reload_if_changed` builds the new snapshot off to the
/// side and only calls `.store()` once the candidate parses in full,
/// satisfying "readers never observe a half-updated policy".
pub struct PolicyEngine {
    snapshot: ArcSwap<Snapshot>,
    path: PathBuf,
    last_seen: Mutex<Option<(SystemTime, u64)>>,
}

impl PolicyEngine {
    /// Load the initial snapshot from `path`. Fails only if the file is
    /// missing or doesn't parse — there is no "previous snapshot" to fall
    /// back to on first load.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = read_and_parse(&path)?;
        let seen = file_signature(&path).ok();
        Ok(Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new(spec)),
            path,
            last_seen: Mutex::new(seen),
        })
    }

    /// Construct an engine directly from an in-memory spec (tests, CLI
    /// one-shot invocations against a spec already loaded elsewhere).
    pub fn from_spec(spec: PolicySpec, path: impl AsRef<Path>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new(spec)),
            path: path.as_ref().to_path_buf(),
            last_seen: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> arc_swap::Guard<std::sync::Arc<Snapshot>> {
        self.snapshot.load()
    }

    /// Check the on-disk file's mtime/size; if changed, parse under strict
    /// schema rules and swap in the new snapshot. On parse failure, the
    /// previous snapshot is retained and the failure is logged at `warn`.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let current_sig = match file_signature(&self.path) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "policy file stat failed during reload check");
                return Ok(false);
            }
        };

        {
            let mut last = self.last_seen.lock().unwrap();
            if *last == Some(current_sig) {
                return Ok(false);
            }
            *last = Some(current_sig);
        }

        match read_and_parse(&self.path) {
            Ok(spec) => {
                self.snapshot.store(std::sync::Arc::new(Snapshot::new(spec)));
                Ok(true)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "policy reload failed, retaining previous snapshot");
                Ok(false)
            }
        }
    }

    pub fn owners(&self, channel: &str) -> HashSet<String> {
        self.current().owners(channel)
    }

    /// Core decision evaluation.
    #[instrument(skip(self), fields(channel = %req.channel, chat_id = %req.chat_id))]
    pub fn evaluate(&self, req: &EvalRequest<'_>) -> PolicyDecision {
        let snapshot = self.current();
        let resolved = resolve(&snapshot.spec, req.channel, req.chat_id);
        let owners = snapshot.owners(req.channel);

        // 1. blockedSenders deny-list takes precedence over everything else.
        if identity::matches_any(req.channel, req.sender, &resolved.blocked_senders) {
            return PolicyDecision::reject("blocked_sender");
        }

        // 2. whoCanTalk.
        let accepted = match resolved.who_can_talk.mode {
            WhoCanTalkMode::Everyone => true,
            WhoCanTalkMode::Allowlist => identity::matches_any(req.channel, req.sender, &resolved.who_can_talk.senders),
            WhoCanTalkMode::OwnerOnly => owners.iter().any(|o| identity::normalize(req.channel, o) == identity::normalize(req.channel, req.sender)),
        };
        if !accepted {
            return PolicyDecision::reject("who_can_talk_denied");
        }

        // 3. whenToReply.
        let should_respond = match resolved.when_to_reply.mode {
            WhenToReplyMode::All => true,
            WhenToReplyMode::Off => false,
            WhenToReplyMode::OwnerOnly => owners
                .iter()
                .any(|o| identity::normalize(req.channel, o) == identity::normalize(req.channel, req.sender)),
            WhenToReplyMode::AllowedSenders => identity::matches_any(req.channel, req.sender, &resolved.when_to_reply.senders),
            WhenToReplyMode::MentionOnly => {
                if !req.is_group {
                    true
                } else {
                    req.mentioned_bot
                        || req.reply_to_bot
                        || (req.channel == "whatsapp" && req.voice_wake_phrase_matched)
                }
            }
        };

        // 4. allowedTools, with the exec/spawn guardrail.
        let mut allowed_tools: HashSet<String> = match resolved.allowed_tools.mode {
            AllowedToolsMode::All => ["exec", "spawn", "search", "fetch", "memory", "calendar"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            AllowedToolsMode::Allowlist => resolved.allowed_tools.tools.iter().cloned().collect(),
        };
        for denied in &resolved.allowed_tools.deny {
            allowed_tools.remove(denied);
        }
        if !allowed_tools.contains("exec") {
            allowed_tools.remove("spawn");
        }
        let denied_tools: HashSet<String> = resolved
            .allowed_tools
            .deny
            .iter()
            .cloned()
            .chain(if !allowed_tools.contains("exec") {
                Some("spawn".to_string())
            } else {
                None
            })
            .collect();

        PolicyDecision {
            accept_message: true,
            should_respond,
            allowed_tools,
            denied_tools,
            persona_file: resolved.persona_file.clone(),
            reason: "accepted".to_string(),
        }
    }

    /// Merged snapshot + a human-readable decision trace, for `/policy
    /// explain-group` and the CLI's `policy explain` subcommand.
    pub fn explain(&self, req: &EvalRequest<'_>) -> (ResolvedLevel, PolicyDecision, Vec<String>) {
        let snapshot = self.current();
        let resolved = resolve(&snapshot.spec, req.channel, req.chat_id);
        let decision = self.evaluate(req);

        let mut trace = Vec::new();
        trace.push(format!("who_can_talk.mode = {:?}", resolved.who_can_talk.mode));
        trace.push(format!("when_to_reply.mode = {:?}", resolved.when_to_reply.mode));
        trace.push(format!("blocked_senders = {:?}", resolved.blocked_senders));
        trace.push(format!("allowed_tools.mode = {:?}", resolved.allowed_tools.mode));
        trace.push(format!("persona_file = {:?}", resolved.persona_file));
        trace.push(format!("decision = accept:{} respond:{} reason:{}", decision.accept_message, decision.should_respond, decision.reason));

        (resolved, decision, trace)
    }
}

fn file_signature(path: &Path) -> std::io::Result<(SystemTime, u64)> {
    let meta = std::fs::metadata(path)?;
    Ok((meta.modified()?, meta.len()))
}

fn read_and_parse(path: &Path) -> Result<PolicySpec> {
    let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let spec: PolicySpec = serde_json::from_str(&text)?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_policy(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("policy.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    const BASE_POLICY: &str = r#"{
        "version": 2,
        "owners": {"whatsapp": ["+15551234567"]},
        "defaults": {"whoCanTalk": {"mode": "everyone"}, "whenToReply": {"mode": "all"}},
        "channels": {
            "whatsapp": {
                "default": {"whenToReply": {"mode": "mention_only"}},
                "chats": {}
            }
        }
    }"#;

    fn req<'a>(channel: &'a str, chat_id: &'a str, sender: &'a str) -> EvalRequest<'a> {
        EvalRequest {
            channel,
            chat_id,
            sender,
            is_group: true,
            mentioned_bot: false,
            reply_to_bot: false,
            voice_wake_phrase_matched: false,
        }
    }

    #[test]
    fn mention_only_group_without_mention_does_not_respond() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, BASE_POLICY);
        let engine = PolicyEngine::load(&path).unwrap();
        let decision = engine.evaluate(&req("whatsapp", "g1", "+15557654321"));
        assert!(decision.accept_message);
        assert!(!decision.should_respond);
    }

    #[test]
    fn mention_only_group_with_mention_responds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, BASE_POLICY);
        let engine = PolicyEngine::load(&path).unwrap();
        let mut r = req("whatsapp", "g1", "+15557654321");
        r.mentioned_bot = true;
        let decision = engine.evaluate(&r);
        assert!(decision.should_respond);
    }

    #[test]
    fn wake_phrase_satisfies_mention_only_for_whatsapp_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, BASE_POLICY);
        let engine = PolicyEngine::load(&path).unwrap();
        let mut r = req("whatsapp", "g1", "+15557654321");
        r.voice_wake_phrase_matched = true;
        let decision = engine.evaluate(&r);
        assert!(decision.should_respond);
    }

    #[test]
    fn blocked_sender_overrides_allowlist_acceptance() {
        let json = r#"{
            "version": 2,
            "owners": {},
            "defaults": {
                "whoCanTalk": {"mode": "allowlist", "senders": ["+1555"]},
                "blockedSenders": {"senders": ["+1555"]}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, json);
        let engine = PolicyEngine::load(&path).unwrap();
        let decision = engine.evaluate(&req("whatsapp", "g1", "+1555"));
        assert!(!decision.accept_message);
        assert_eq!(decision.reason, "blocked_sender");
    }

    #[test]
    fn exec_denied_implies_spawn_denied() {
        let json = r#"{
            "version": 2,
            "defaults": {
                "allowedTools": {"mode": "allowlist", "tools": ["spawn", "search"], "deny": []}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, json);
        let engine = PolicyEngine::load(&path).unwrap();
        let decision = engine.evaluate(&req("telegram", "c1", "u1"));
        assert!(!decision.allowed_tools.contains("spawn"));
        assert!(decision.denied_tools.contains("spawn"));
    }

    #[test]
    fn chat_level_overrides_channel_default_overrides_global_default() {
        let json = r#"{
            "version": 2,
            "defaults": {"whenToReply": {"mode": "off"}},
            "channels": {
                "telegram": {
                    "default": {"whenToReply": {"mode": "mention_only"}},
                    "chats": {"c1": {"whenToReply": {"mode": "all"}}}
                }
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, json);
        let engine = PolicyEngine::load(&path).unwrap();
        let decision = engine.evaluate(&req("telegram", "c1", "u1"));
        assert!(decision.should_respond);
        let decision_other_chat = engine.evaluate(&req("telegram", "c2", "u1"));
        assert!(!decision_other_chat.should_respond);
    }

    #[test]
    fn reload_detects_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, BASE_POLICY);
        let engine = PolicyEngine::load(&path).unwrap();
        assert!(!engine.reload_if_changed().unwrap());

        std::thread::sleep(std::time::Duration::from_millis(10));
        let changed = r#"{"version": 2, "defaults": {"whenToReply": {"mode": "off"}}}"#;
        write_policy(&dir, changed);
        assert!(engine.reload_if_changed().unwrap());
        let decision = engine.evaluate(&req("telegram", "c1", "u1"));
        assert!(!decision.should_respond);
    }

    #[test]
    fn reload_retains_previous_snapshot_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_policy(&dir, BASE_POLICY);
        let engine = PolicyEngine::load(&path).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        write_policy(&dir, "{ not valid json");
        let reloaded = engine.reload_if_changed().unwrap();
        assert!(!reloaded);

        // old snapshot still answers mention_only for whatsapp as before.
        let decision = engine.evaluate(&req("whatsapp", "g1", "+1555"));
        assert!(!decision.should_respond);
    }
}
