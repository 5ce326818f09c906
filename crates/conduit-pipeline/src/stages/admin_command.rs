use async_trait::async_trait;
use conduit_core::types::OrchestratorIntent;
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

const COMMAND_PREFIXES: [&str; 3] = ["/policy", "/reset", "/panic"];

fn matching_prefix(text: &str) -> Option<&'static str> {
    COMMAND_PREFIXES
        .iter()
        .copied()
        .find(|prefix| text == *prefix || text.starts_with(&format!("{prefix} ")))
}

/// Dispatches `/policy`, `/reset`, and `/panic` from an owner DM to the
/// admin handler. Any other unrecognized or unauthorized
/// command-namespace message halts silently; plain text passes through
/// untouched.
pub struct AdminCommand;

#[async_trait]
impl Stage for AdminCommand {
    fn name(&self) -> &'static str {
        "admin_command"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let text = ctx.event.text();
        let Some(prefix) = matching_prefix(text.trim()) else {
            return Ok(Flow::Continue);
        };

        let owners = deps.policy.owners(ctx.event.channel.as_str());
        let is_owner = conduit_policy::identity::matches_any(
            ctx.event.channel.as_str(),
            ctx.event.sender.id.as_str(),
            &owners.into_iter().collect::<Vec<_>>(),
        );
        if !is_owner {
            ctx.halt();
            return Ok(Flow::Halt);
        }
        if prefix == "/policy" && ctx.event.is_group {
            ctx.halt();
            return Ok(Flow::Halt);
        }

        let rest = text.trim()[prefix.len()..].trim();
        let reply = match prefix {
            "/policy" => match deps.admin.handle(
                ctx.event.channel.as_str(),
                ctx.event.sender.id.as_str(),
                rest,
            ) {
                Ok(response) => response.text,
                Err(e) => {
                    warn!(error = %e, "admin command failed");
                    format!("admin command failed: {e}")
                }
            },
            "/reset" => {
                ctx.set_meta("session_reset_requested", true);
                "session reset".to_string()
            }
            "/panic" => {
                deps.shutdown.cancel();
                "shutdown initiated: draining in-flight replies".to_string()
            }
            _ => unreachable!("matching_prefix only returns a known prefix"),
        };

        ctx.push_intent(OrchestratorIntent::OutboundText {
            channel: ctx.event.channel.clone(),
            chat_id: ctx.event.chat_id.clone(),
            text: reply,
            reply_to: Some(ctx.event.id.clone()),
        });
        ctx.halt();
        Ok(Flow::Halt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn non_command_text_passes_through() {
        let deps = test_deps();
        let msg = test_message("c1", "hello there");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(AdminCommand.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
        assert!(!ctx.halted);
    }

    #[tokio::test]
    async fn non_owner_is_silently_halted() {
        let deps = test_deps();
        let msg = test_message("c1", "/policy help");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(AdminCommand.run(&mut ctx, &deps).await.unwrap(), Flow::Halt);
        assert!(ctx.intents.is_empty());
    }
}
