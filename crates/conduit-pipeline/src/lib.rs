//! The 13-stage inbound middleware chain and its shared context,
//! dependencies, and collaborator seams.
//!
//! [`Pipeline`] owns a static, declared-order `Vec<Box<dyn Stage>>` built
//! once in [`Pipeline::new`] — there is no self-registration or priority
//! sort; call-site order there *is* run order. [`PipelineDeps`] bundles
//! everything a stage needs besides the per-run [`PipelineContext`].

pub mod context;
pub mod deps;
pub mod error;
pub mod responder;
pub mod stage;
pub mod stages;
pub mod tts;

#[cfg(test)]
mod test_support;

use tracing::{instrument, warn};

use conduit_core::types::{Message, OrchestratorIntent};

pub use context::PipelineContext;
pub use deps::{PipelineDeps, PipelineSettings};
pub use error::{PipelineError, Result};
pub use stage::{Flow, Stage};

/// Sequences the 13 stages in the declared order:
/// `Normalize → Dedup → Archive → ReplyContextEnrich → AdminCommand →
/// Policy → IdeaCapture → AccessControl → NewChatNotify → NoReplyFilter →
/// InputSecurity → Responder → Outbound`.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: vec![
                Box::new(stages::normalize::Normalize),
                Box::new(stages::dedup::Dedup),
                Box::new(stages::archive::Archive),
                Box::new(stages::reply_context::ReplyContextEnrich),
                Box::new(stages::admin_command::AdminCommand),
                Box::new(stages::policy::Policy),
                Box::new(stages::idea_capture::IdeaCapture),
                Box::new(stages::access_control::AccessControl),
                Box::new(stages::new_chat_notify::NewChatNotify),
                Box::new(stages::no_reply_filter::NoReplyFilter),
                Box::new(stages::input_security::InputSecurity),
                Box::new(stages::respond::Respond),
                Box::new(stages::outbound::Outbound),
            ],
        }
    }

    /// Run every stage over one inbound message, in order, stopping at the
    /// first stage that halts (either by returning `Flow::Halt` or by
    /// setting `ctx.halted`). A stage that returns `Err` is treated as the
    /// "unexpected failure" case in the middleware contract: the
    /// runner logs it via a telemetry intent, halts, and emits nothing
    /// further for this message — but still returns whatever intents had
    /// already been appended up-stack.
    #[instrument(skip(self, deps), fields(channel = %event.channel, chat_id = %event.chat_id, message_id = %event.id))]
    pub async fn run(&self, event: Message, deps: &PipelineDeps) -> Vec<OrchestratorIntent> {
        let mut ctx = PipelineContext::new(event);

        for stage in &self.stages {
            if deps.shutdown.is_cancelled() {
                warn!(stage = stage.name(), "shutdown in progress, halting pipeline run");
                break;
            }

            match stage.run(&mut ctx, deps).await {
                Ok(Flow::Continue) => {
                    if ctx.halted {
                        break;
                    }
                }
                Ok(Flow::Halt) => break,
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "stage failed, halting pipeline run");
                    ctx.push_intent(OrchestratorIntent::MetricEvent {
                        name: "pipeline.stage_failed".to_string(),
                        labels: std::collections::HashMap::from([
                            ("stage".to_string(), stage.name().to_string()),
                            ("error".to_string(), e.to_string()),
                        ]),
                        value: 1.0,
                    });
                    break;
                }
            }
        }

        ctx.into_intents()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::{test_deps, test_message};

    #[tokio::test]
    async fn empty_text_halts_at_normalize_with_no_intents() {
        let deps = test_deps();
        let pipeline = Pipeline::new();
        let msg = test_message("c1", "   ");
        let intents = pipeline.run(msg, &deps).await;
        assert!(intents.is_empty());
    }

    #[tokio::test]
    async fn ordinary_message_runs_the_full_chain_without_panicking() {
        let deps = test_deps();
        let pipeline = Pipeline::new();
        let msg = test_message("c1", "hello there");
        // NullResponder never replies, so no OutboundText is expected — this
        // just exercises every stage end to end.
        let intents = pipeline.run(msg, &deps).await;
        assert!(intents.iter().all(|i| !matches!(i, OrchestratorIntent::OutboundText { .. })));
    }

    #[tokio::test]
    async fn cancelled_shutdown_token_halts_before_the_first_stage() {
        let deps = test_deps();
        deps.shutdown.cancel();
        let pipeline = Pipeline::new();
        let msg = test_message("c1", "hello there");
        let intents = pipeline.run(msg, &deps).await;
        assert!(intents.is_empty());
    }
}
