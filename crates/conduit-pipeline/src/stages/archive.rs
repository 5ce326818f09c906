use async_trait::async_trait;
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Inserts the message into the inbound archive idempotently. A write
/// failure is logged but never halts the chain — the archive is best-effort
/// for read-side features.
pub struct Archive;

#[async_trait]
impl Stage for Archive {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        if let Err(e) = deps.archive.insert(&ctx.event) {
            warn!(error = %e, channel = %ctx.event.channel, chat_id = %ctx.event.chat_id, "archive insert failed");
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn continues_even_when_insert_succeeds() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(Archive.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
        let record = deps
            .archive
            .lookup(ctx.event.channel.as_str(), ctx.event.chat_id.as_str(), ctx.event.id.as_str())
            .unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn inserting_same_message_twice_is_idempotent() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        Archive.run(&mut ctx, &deps).await.unwrap();
        let flow = Archive.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
    }
}
