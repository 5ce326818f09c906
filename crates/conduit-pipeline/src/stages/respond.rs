use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::types::{OrchestratorIntent, PolicyDecision, TypingState};
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::responder::ContextWindows;
use crate::stage::{Flow, Stage};

const MEMORY_RECALL_LIMIT: usize = 5;

/// Invokes the configured `Responder`, bracketed by `Typing{on}`/`Typing{off}`
/// intents, and stashes the reply text (if any) in `ctx.metadata.reply_text`
/// for the Outbound stage to pick up. Never halts — a responder
/// error is recorded as telemetry and the chain proceeds to Outbound with no
/// reply text, matching Outbound's "text or null" contract.
pub struct Respond;

#[async_trait]
impl Stage for Respond {
    fn name(&self) -> &'static str {
        "responder"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let decision = ctx.decision.clone().unwrap_or_else(|| PolicyDecision::reject("missing_decision"));
        let context_windows: ContextWindows = ctx
            .metadata
            .get("context_windows")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let query_text = ctx.event.text();
        let memory_snippets = deps
            .memory
            .recall(&query_text, ctx.event.chat_id.as_str(), ctx.event.sender.id.as_str(), None, MEMORY_RECALL_LIMIT)
            .unwrap_or_default();

        ctx.push_intent(OrchestratorIntent::Typing {
            channel: ctx.event.channel.clone(),
            chat_id: ctx.event.chat_id.clone(),
            state: TypingState::On,
        });

        let result = deps
            .responder
            .generate_reply(&ctx.event, &decision, &context_windows, &memory_snippets)
            .await;

        ctx.push_intent(OrchestratorIntent::Typing {
            channel: ctx.event.channel.clone(),
            chat_id: ctx.event.chat_id.clone(),
            state: TypingState::Off,
        });

        match result {
            Ok(Some(text)) => ctx.set_meta("reply_text", text),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "responder failed");
                ctx.push_intent(OrchestratorIntent::MetricEvent {
                    name: "pipeline.responder_failed".to_string(),
                    labels: HashMap::from([("error".to_string(), e)]),
                    value: 1.0,
                });
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn null_responder_brackets_typing_with_no_reply_text() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        let flow = Respond.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(ctx.intents.len(), 2);
        assert!(matches!(
            ctx.intents[0],
            OrchestratorIntent::Typing { state: TypingState::On, .. }
        ));
        assert!(matches!(
            ctx.intents[1],
            OrchestratorIntent::Typing { state: TypingState::Off, .. }
        ));
        assert!(!ctx.metadata.contains_key("reply_text"));
    }
}
