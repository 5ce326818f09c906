use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::types::OrchestratorIntent;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Halts when the policy decision rejected the message, recording the
/// reason as a telemetry intent rather than letting it leak into a reply.
pub struct AccessControl;

#[async_trait]
impl Stage for AccessControl {
    fn name(&self) -> &'static str {
        "access_control"
    }

    async fn run(&self, ctx: &mut PipelineContext, _deps: &PipelineDeps) -> Result<Flow> {
        let accepted = ctx.decision.as_ref().map(|d| d.accept_message).unwrap_or(false);
        if accepted {
            return Ok(Flow::Continue);
        }

        let reason = ctx.decision.as_ref().map(|d| d.reason.clone()).unwrap_or_else(|| "no_decision".to_string());
        ctx.push_intent(OrchestratorIntent::MetricEvent {
            name: "pipeline.access_denied".to_string(),
            labels: HashMap::from([("reason".to_string(), reason)]),
            value: 1.0,
        });
        ctx.halt();
        Ok(Flow::Halt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::policy::Policy;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn accepted_decision_continues() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        Policy.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(AccessControl.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
    }

    #[tokio::test]
    async fn missing_decision_halts_defensively() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        let flow = AccessControl.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Halt);
        assert_eq!(ctx.intents.len(), 1);
    }
}
