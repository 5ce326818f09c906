use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Keyed by `(channel, chat_id, message_id)` against the shared LRU+TTL
/// cache. First occurrence passes through; duplicates halt silently.
pub struct Dedup;

#[async_trait]
impl Stage for Dedup {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let key = (
            ctx.event.channel.as_str().to_string(),
            ctx.event.chat_id.as_str().to_string(),
            ctx.event.id.as_str().to_string(),
        );
        let mut cache = deps.dedup_cache.lock().unwrap();
        let was_duplicate = cache.insert(key, ());
        drop(cache);

        if was_duplicate {
            ctx.halt();
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn second_occurrence_of_same_key_halts() {
        let deps = test_deps();
        let msg = test_message("c1", "hi");
        let id = msg.id.clone();

        let mut ctx1 = PipelineContext::new(msg.clone());
        assert_eq!(Dedup.run(&mut ctx1, &deps).await.unwrap(), Flow::Continue);

        let mut second = msg;
        second.id = id;
        let mut ctx2 = PipelineContext::new(second);
        assert_eq!(Dedup.run(&mut ctx2, &deps).await.unwrap(), Flow::Halt);
    }
}
