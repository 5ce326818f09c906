use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Halts when the policy decision says not to respond. The message stays
/// archived and may still feed memory capture via a background path — this
/// stage only gates the Responder invocation.
pub struct NoReplyFilter;

#[async_trait]
impl Stage for NoReplyFilter {
    fn name(&self) -> &'static str {
        "no_reply_filter"
    }

    async fn run(&self, ctx: &mut PipelineContext, _deps: &PipelineDeps) -> Result<Flow> {
        let should_respond = ctx.decision.as_ref().map(|d| d.should_respond).unwrap_or(false);
        if !should_respond {
            ctx.halt();
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::policy::Policy;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn passthrough_when_should_respond() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        Policy.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(NoReplyFilter.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
    }

    #[tokio::test]
    async fn no_decision_halts_defensively() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(NoReplyFilter.run(&mut ctx, &deps).await.unwrap(), Flow::Halt);
    }
}
