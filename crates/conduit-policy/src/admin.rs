//! Admin commands for live policy edits.
//!
//! Every mutating command: validates, writes a full snapshot backup of the
//! policy file under `policy_backups/`, atomically replaces `policy.json`
//! (temp file + rename), and appends a row to `policy_audit_log`. `--dry-run`
//! runs the same validation and produces the same response without touching
//! the file or the log. A per-actor rolling-minute counter enforces
//! `runtime.adminCommandRateLimitPerMinute`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::engine::{resolve, EvalRequest, PolicyEngine};
use crate::error::{PolicyError, Result};
use crate::schema::{
    BlockedSenders, ChannelPolicy, PolicyLevel, PolicySpec, WhenToReply, WhenToReplyMode,
};

/// Outcome of one admin command invocation.
#[derive(Debug, Clone)]
pub struct AdminResponse {
    pub text: String,
    pub change_id: Option<String>,
    pub dry_run: bool,
}

fn ok(text: impl Into<String>) -> AdminResponse {
    AdminResponse {
        text: text.into(),
        change_id: None,
        dry_run: false,
    }
}

pub struct AdminHandler {
    engine: Arc<PolicyEngine>,
    audit_db: Mutex<Connection>,
    backups_dir: PathBuf,
    rate: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl AdminHandler {
    pub fn new(engine: Arc<PolicyEngine>, audit_db_path: impl AsRef<Path>, backups_dir: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(audit_db_path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS policy_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_unix_ms INTEGER NOT NULL,
                actor_channel TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                command_raw TEXT NOT NULL,
                dry_run INTEGER NOT NULL,
                result TEXT NOT NULL,
                before_hash TEXT,
                after_hash TEXT,
                backup_ref TEXT
            );",
        )?;
        std::fs::create_dir_all(backups_dir.as_ref()).map_err(|source| PolicyError::Read {
            path: backups_dir.as_ref().display().to_string(),
            source,
        })?;
        Ok(Self {
            engine,
            audit_db: Mutex::new(conn),
            backups_dir: backups_dir.as_ref().to_path_buf(),
            rate: Mutex::new(HashMap::new()),
        })
    }

    fn check_rate_limit(&self, actor: &str) -> Result<()> {
        let limit = self.engine.current().spec.runtime.admin_command_rate_limit_per_minute;
        let mut rate = self.rate.lock().unwrap();
        let now = Instant::now();
        let window = rate.entry(actor.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= limit {
            return Err(PolicyError::RateLimited {
                actor: actor.to_string(),
            });
        }
        window.push_back(now);
        Ok(())
    }

    /// Dispatch one admin command. `actor` is the sender identity issuing it
    /// (already confirmed an owner by the caller); `raw` is the command text
    /// with any `/policy` prefix already stripped.
    pub fn handle(&self, actor_channel: &str, actor: &str, raw: &str) -> Result<AdminResponse> {
        self.check_rate_limit(actor)?;

        let tokens = shlex::split(raw).ok_or_else(|| PolicyError::InvalidCommand(raw.to_string()))?;
        let mut tokens = tokens.into_iter();
        let cmd = tokens.next().ok_or_else(|| PolicyError::InvalidCommand("empty command".to_string()))?;
        let rest: Vec<String> = tokens.collect();
        let dry_run = rest.iter().any(|t| t == "--dry-run");
        let confirm = rest.iter().any(|t| t == "--confirm");
        let args: Vec<&str> = rest
            .iter()
            .filter(|t| *t != "--dry-run" && *t != "--confirm")
            .map(|s| s.as_str())
            .collect();

        let canonical = match cmd.as_str() {
            "resume-group" => "allow-group",
            "pause-group" => "block-group",
            "groups" => "list-groups",
            other => other,
        };

        let response = match canonical {
            "help" => Ok(ok(HELP_TEXT)),
            "list-groups" => self.list_groups(actor_channel, args.first().copied()),
            "resolve-group" => self.resolve_group(actor_channel, args.first().copied()),
            "status-group" => self.status_group(actor_channel, args.first().copied()),
            "explain-group" => self.explain_group(actor_channel, args.first().copied(), actor),
            "allow-group" => self.set_when_to_reply(actor_channel, actor, &raw_cmd(canonical, &rest), args.first().copied(), WhenToReplyMode::All, dry_run),
            "block-group" => self.set_when_to_reply(actor_channel, actor, &raw_cmd(canonical, &rest), args.first().copied(), WhenToReplyMode::Off, dry_run),
            "set-when" => self.admin_set_when(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run),
            "set-persona" => self.admin_set_persona(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run),
            "clear-persona" => self.admin_clear_persona(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run),
            "block-sender" => self.admin_block_sender(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run),
            "unblock-sender" => self.admin_unblock_sender(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run),
            "list-blocked" => self.list_blocked(actor_channel, args.first().copied()),
            "history" => self.history(args.first().copied()),
            "rollback" => self.rollback(actor_channel, actor, &raw_cmd(canonical, &rest), &args, dry_run, confirm),
            other => Err(PolicyError::InvalidCommand(format!("unknown command `{other}`"))),
        };

        let is_read_only = matches!(
            canonical,
            "help" | "list-groups" | "resolve-group" | "status-group" | "explain-group" | "list-blocked" | "history"
        );
        if is_read_only && canonical != "help" && response.is_ok() {
            self.record_audit(actor_channel, actor, raw, false, "read", None, None, None)?;
        }
        response
    }

    fn list_groups(&self, channel: &str, query: Option<&str>) -> Result<AdminResponse> {
        let snapshot = self.engine.current();
        let chats: Vec<&String> = snapshot
            .spec
            .channels
            .get(channel)
            .map(|c| c.chats.keys().collect())
            .unwrap_or_default();
        let filtered: Vec<&&String> = chats
            .iter()
            .filter(|id| query.map(|q| id.contains(q)).unwrap_or(true))
            .collect();
        if filtered.is_empty() {
            return Ok(ok("no groups with explicit policy overrides"));
        }
        Ok(ok(filtered.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n")))
    }

    fn resolve_group(&self, channel: &str, needle: Option<&str>) -> Result<AdminResponse> {
        let needle = needle.ok_or_else(|| PolicyError::InvalidCommand("resolve-group requires a chat id or fragment".to_string()))?;
        let snapshot = self.engine.current();
        let matches: Vec<&String> = snapshot
            .spec
            .channels
            .get(channel)
            .map(|c| c.chats.keys().filter(|id| id.contains(needle)).collect())
            .unwrap_or_default();
        match matches.len() {
            0 => Ok(ok(format!("no chat matching `{needle}`"))),
            1 => Ok(ok(matches[0].clone())),
            _ => Ok(ok(format!(
                "ambiguous: {}",
                matches.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn status_group(&self, channel: &str, chat_id: Option<&str>) -> Result<AdminResponse> {
        let chat_id = chat_id.ok_or_else(|| PolicyError::InvalidCommand("status-group requires a chat id".to_string()))?;
        let snapshot = self.engine.current();
        let resolved = resolve(&snapshot.spec, channel, chat_id);
        Ok(ok(format!(
            "who_can_talk={:?} when_to_reply={:?} blocked={} persona={:?}",
            resolved.who_can_talk.mode,
            resolved.when_to_reply.mode,
            resolved.blocked_senders.len(),
            resolved.persona_file
        )))
    }

    fn explain_group(&self, channel: &str, chat_id: Option<&str>, actor: &str) -> Result<AdminResponse> {
        let chat_id = chat_id.ok_or_else(|| PolicyError::InvalidCommand("explain-group requires a chat id".to_string()))?;
        let req = EvalRequest {
            channel,
            chat_id,
            sender: actor,
            is_group: true,
            mentioned_bot: false,
            reply_to_bot: false,
            voice_wake_phrase_matched: false,
        };
        let (_, _, trace) = self.engine.explain(&req);
        Ok(ok(trace.join("\n")))
    }

    fn list_blocked(&self, channel: &str, chat_id: Option<&str>) -> Result<AdminResponse> {
        let chat_id = chat_id.ok_or_else(|| PolicyError::InvalidCommand("list-blocked requires a chat id".to_string()))?;
        let snapshot = self.engine.current();
        let resolved = resolve(&snapshot.spec, channel, chat_id);
        if resolved.blocked_senders.is_empty() {
            Ok(ok("no blocked senders"))
        } else {
            Ok(ok(resolved.blocked_senders.join("\n")))
        }
    }

    fn history(&self, limit: Option<&str>) -> Result<AdminResponse> {
        let limit: i64 = limit.and_then(|s| s.parse().ok()).unwrap_or(20);
        let conn = self.audit_db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp_unix_ms, actor_id, command_raw, dry_run, result, backup_ref
             FROM policy_audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(format!(
                "[{}] {} `{}` dry_run={} result={} change={}",
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            ))
        })?;
        let lines: std::result::Result<Vec<String>, rusqlite::Error> = rows.collect();
        Ok(ok(lines?.join("\n")))
    }

    // -- mutation helpers --------------------------------------------------

    fn rollback(
        &self,
        actor_channel: &str,
        actor: &str,
        raw: &str,
        args: &[&str],
        dry_run: bool,
        confirm: bool,
    ) -> Result<AdminResponse> {
        let change_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("rollback requires a change id".to_string()))?;
        let requires_confirm = self.engine.current().spec.runtime.admin_require_confirm_for_risky;
        if requires_confirm && !dry_run && !confirm {
            return Err(PolicyError::InvalidCommand(
                "rollback is a risky command; pass --confirm".to_string(),
            ));
        }
        let backup_path = self.backups_dir.join(format!("{change_id}.json"));
        let backup_text = std::fs::read_to_string(&backup_path).map_err(|_| PolicyError::UnknownChange(change_id.to_string()))?;
        let restored: PolicySpec = serde_json::from_str(&backup_text)?;
        self.apply_mutation(actor_channel, actor, raw, dry_run, restored)
    }

    fn admin_set_when(&self, channel: &str, actor: &str, raw: &str, args: &[&str], dry_run: bool) -> Result<AdminResponse> {
        let chat_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("set-when requires <chat_id> <mode>".to_string()))?;
        let mode_str = args.get(1).ok_or_else(|| PolicyError::InvalidCommand("set-when requires <chat_id> <mode>".to_string()))?;
        let mode = parse_when_to_reply_mode(mode_str)?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            level.when_to_reply = Some(WhenToReply {
                mode,
                senders: level
                    .when_to_reply
                    .as_ref()
                    .map(|w| w.senders.clone())
                    .unwrap_or_default(),
            });
        })
    }

    fn set_when_to_reply(
        &self,
        channel: &str,
        actor: &str,
        raw: &str,
        chat_id: Option<&str>,
        mode: WhenToReplyMode,
        dry_run: bool,
    ) -> Result<AdminResponse> {
        let chat_id = chat_id.ok_or_else(|| PolicyError::InvalidCommand("requires a chat id".to_string()))?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            level.when_to_reply = Some(WhenToReply {
                mode,
                senders: Vec::new(),
            });
        })
    }

    fn admin_set_persona(&self, channel: &str, actor: &str, raw: &str, args: &[&str], dry_run: bool) -> Result<AdminResponse> {
        let chat_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("set-persona requires <chat_id> <path>".to_string()))?;
        let path = args.get(1).ok_or_else(|| PolicyError::InvalidCommand("set-persona requires <chat_id> <path>".to_string()))?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            level.persona_file = Some(Some(path.to_string()));
        })
    }

    fn admin_clear_persona(&self, channel: &str, actor: &str, raw: &str, args: &[&str], dry_run: bool) -> Result<AdminResponse> {
        let chat_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("clear-persona requires a chat id".to_string()))?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            level.persona_file = Some(None);
        })
    }

    fn admin_block_sender(&self, channel: &str, actor: &str, raw: &str, args: &[&str], dry_run: bool) -> Result<AdminResponse> {
        let chat_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("block-sender requires <chat_id> <sender>".to_string()))?;
        let sender = args.get(1).ok_or_else(|| PolicyError::InvalidCommand("block-sender requires <chat_id> <sender>".to_string()))?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            let mut senders = level.blocked_senders.as_ref().map(|b| b.senders.clone()).unwrap_or_default();
            if !senders.iter().any(|s| s == sender) {
                senders.push(sender.to_string());
            }
            level.blocked_senders = Some(BlockedSenders { senders });
        })
    }

    fn admin_unblock_sender(&self, channel: &str, actor: &str, raw: &str, args: &[&str], dry_run: bool) -> Result<AdminResponse> {
        let chat_id = args.first().ok_or_else(|| PolicyError::InvalidCommand("unblock-sender requires <chat_id> <sender>".to_string()))?;
        let sender = args.get(1).ok_or_else(|| PolicyError::InvalidCommand("unblock-sender requires <chat_id> <sender>".to_string()))?;
        self.mutate_chat_level(channel, actor, raw, chat_id, dry_run, |level| {
            let senders = level
                .blocked_senders
                .as_ref()
                .map(|b| b.senders.iter().filter(|s| *s != sender).cloned().collect())
                .unwrap_or_default();
            level.blocked_senders = Some(BlockedSenders { senders });
        })
    }

    /// Shared path for every chat-level field mutation: clone the current
    /// spec, apply `edit` to the target chat's [`PolicyLevel`] (creating the
    /// channel/chat entries if absent), then run the common backup+write+
    /// audit sequence.
    fn mutate_chat_level<F>(&self, channel: &str, actor: &str, raw: &str, chat_id: &str, dry_run: bool, edit: F) -> Result<AdminResponse>
    where
        F: FnOnce(&mut PolicyLevel),
    {
        let mut spec = self.engine.current().spec.clone();
        let channel_policy = spec.channels.entry(channel.to_string()).or_insert_with(ChannelPolicy::default);
        let level = channel_policy.chats.entry(chat_id.to_string()).or_insert_with(PolicyLevel::default);
        edit(level);
        self.apply_mutation(channel, actor, raw, dry_run, spec)
    }

    fn apply_mutation(&self, actor_channel: &str, actor: &str, raw: &str, dry_run: bool, new_spec: PolicySpec) -> Result<AdminResponse> {
        let before = self.engine.current().spec.clone();
        let before_json = serde_json::to_string_pretty(&before)?;
        let after_json = serde_json::to_string_pretty(&new_spec)?;
        let before_hash = hex::encode(Sha256::digest(before_json.as_bytes()));
        let after_hash = hex::encode(Sha256::digest(after_json.as_bytes()));

        if dry_run {
            return Ok(AdminResponse {
                text: format!("dry run ok; would change policy (before={before_hash:.8} after={after_hash:.8})"),
                change_id: None,
                dry_run: true,
            });
        }

        let change_id = uuid::Uuid::now_v7().to_string();
        let backup_path = self.backups_dir.join(format!("{change_id}.json"));
        std::fs::write(&backup_path, &before_json).map_err(PolicyError::Write)?;

        write_atomically(self.engine.path(), &after_json)?;
        self.engine.reload_if_changed()?;

        self.record_audit(
            actor_channel,
            actor,
            raw,
            false,
            "applied",
            Some(before_hash.as_str()),
            Some(after_hash.as_str()),
            Some(change_id.as_str()),
        )?;

        Ok(AdminResponse {
            text: format!("applied as change {change_id}"),
            change_id: Some(change_id),
            dry_run: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_audit(
        &self,
        actor_channel: &str,
        actor: &str,
        raw: &str,
        dry_run: bool,
        result: &str,
        before_hash: Option<&str>,
        after_hash: Option<&str>,
        backup_ref: Option<&str>,
    ) -> Result<()> {
        let conn = self.audit_db.lock().unwrap();
        conn.execute(
            "INSERT INTO policy_audit_log
                (timestamp_unix_ms, actor_channel, actor_id, command_raw, dry_run, result, before_hash, after_hash, backup_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chrono::Utc::now().timestamp_millis(),
                actor_channel,
                actor,
                raw,
                dry_run as i64,
                result,
                before_hash,
                after_hash,
                backup_ref,
            ],
        )?;
        Ok(())
    }
}

fn raw_cmd(canonical: &str, rest: &[String]) -> String {
    std::iter::once(canonical.to_string()).chain(rest.iter().cloned()).collect::<Vec<_>>().join(" ")
}

fn parse_when_to_reply_mode(s: &str) -> Result<WhenToReplyMode> {
    match s {
        "all" => Ok(WhenToReplyMode::All),
        "off" => Ok(WhenToReplyMode::Off),
        "mention_only" => Ok(WhenToReplyMode::MentionOnly),
        "allowed_senders" => Ok(WhenToReplyMode::AllowedSenders),
        "owner_only" => Ok(WhenToReplyMode::OwnerOnly),
        other => Err(PolicyError::InvalidCommand(format!("unknown when_to_reply mode `{other}`"))),
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents).map_err(PolicyError::Write)?;
    std::fs::rename(&tmp_path, path).map_err(PolicyError::Write)?;
    Ok(())
}

const HELP_TEXT: &str = "\
commands: list-groups [query], resolve-group <id|fragment>, status-group <chat_id>, \
explain-group <chat_id>, allow-group <chat_id> [--dry-run] (alias resume-group), \
block-group <chat_id> [--dry-run] (alias pause-group), set-when <chat_id> <mode> [--dry-run], \
set-persona <chat_id> <path> [--dry-run], clear-persona <chat_id> [--dry-run], \
block-sender <chat_id> <sender> [--dry-run], unblock-sender <chat_id> <sender> [--dry-run], \
list-blocked <chat_id>, history [limit], rollback <change_id> [--confirm] [--dry-run]";
