//! `conduit` — the admin-command and policy-explain touch-points that need
//! to exist outside the chat surface: "a command that
//! invokes the admin handler directly (same backend as DM commands) for
//! scripting" and "a command to show the merged policy + decision trace
//! for a specific (channel, chat, sender)". Both subcommands load the same
//! [`conduit_policy::PolicyEngine`]/[`conduit_policy::AdminHandler`] pair
//! the gateway's `AdminCommand` pipeline stage uses, so a scripted
//! `conduit policy admin ...` run and an owner's `/policy ...` DM produce
//! byte-identical audit rows.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conduit_core::config::ConduitConfig;
use conduit_policy::{AdminHandler, EvalRequest, PolicyEngine};

#[derive(Parser)]
#[command(name = "conduit", about = "Conduit assistant runtime — admin and policy tooling")]
struct Cli {
    /// Path to config.json (defaults to the same resolution main uses:
    /// CONDUIT_CONFIG env, then ~/.conduit/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Policy inspection and live admin mutation.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Invoke an admin command against the live policy.json, exactly as an
    /// owner's `/policy ...` DM would. `raw` is the full command
    /// line after `/policy`, e.g. `allow-group 123@g.us --dry-run`.
    Admin {
        /// Channel the acting owner is issuing the command on (e.g. whatsapp).
        #[arg(long)]
        channel: String,
        /// Sender identity of the issuing owner (must pass `owners[channel]`
        /// the same as it would through the chat surface — this binary does
        /// not bypass that check).
        #[arg(long)]
        actor: String,
        /// The admin command line, unparsed (shell-tokenized by the handler).
        raw: Vec<String>,
    },
    /// Print the merged policy snapshot and decision trace for one
    /// `(channel, chat, sender)`.
    Explain {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        chat: String,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        group: bool,
        #[arg(long)]
        mentioned: bool,
        #[arg(long = "reply-to-bot")]
        reply_to_bot: bool,
    },
}

fn load_config(explicit: Option<PathBuf>) -> ConduitConfig {
    let path = explicit.map(|p| p.display().to_string()).or_else(|| std::env::var("CONDUIT_CONFIG").ok());
    ConduitConfig::load(path.as_deref()).unwrap_or_else(|e| {
        eprintln!("warning: config load failed ({e}), using defaults");
        ConduitConfig::default()
    })
}

fn open_policy(config: &ConduitConfig) -> Result<(Arc<PolicyEngine>, AdminHandler)> {
    let storage = &config.storage;
    let engine = Arc::new(PolicyEngine::load(storage.policy_path()).context("loading policy.json")?);
    let admin = AdminHandler::new(Arc::clone(&engine), storage.policy_audit_db_path(), storage.policy_backups_dir())
        .context("opening policy audit store")?;
    Ok((engine, admin))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config);

    let Command::Policy { action } = cli.command;

    match action {
        PolicyAction::Admin { channel, actor, raw } => {
            let (_engine, admin) = open_policy(&config)?;
            let raw_line = raw.join(" ");
            match admin.handle(&channel, &actor, &raw_line) {
                Ok(response) => {
                    println!("{}", response.text);
                    if let Some(change_id) = response.change_id {
                        println!("change_id: {change_id}");
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        PolicyAction::Explain { channel, chat, sender, group, mentioned, reply_to_bot } => {
            let (engine, _admin) = open_policy(&config)?;
            let req = EvalRequest {
                channel: &channel,
                chat_id: &chat,
                sender: &sender,
                is_group: group,
                mentioned_bot: mentioned,
                reply_to_bot,
                voice_wake_phrase_matched: false,
            };
            let (resolved, decision, trace) = engine.explain(&req);
            println!("resolved:");
            println!("  who_can_talk  = {:?}", resolved.who_can_talk.mode);
            println!("  when_to_reply = {:?}", resolved.when_to_reply.mode);
            println!("  blocked       = {} sender(s)", resolved.blocked_senders.len());
            println!("  persona_file  = {:?}", resolved.persona_file);
            println!("decision:");
            println!("  accept_message = {}", decision.accept_message);
            println!("  should_respond = {}", decision.should_respond);
            println!("  allowed_tools  = {:?}", decision.allowed_tools);
            println!("  denied_tools   = {:?}", decision.denied_tools);
            println!("  reason         = {}", decision.reason);
            println!("trace:");
            for line in trace {
                println!("  - {line}");
            }
        }
    }

    Ok(())
}
