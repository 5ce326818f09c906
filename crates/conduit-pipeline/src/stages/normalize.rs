use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Trims whitespace from every text content block and drops the message if
/// its canonical text is empty once trimmed.
pub struct Normalize;

#[async_trait]
impl Stage for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run(&self, ctx: &mut PipelineContext, _deps: &PipelineDeps) -> Result<Flow> {
        for block in ctx.event.content.iter_mut() {
            if let Some(text) = &mut block.text {
                let trimmed = text.trim().to_string();
                *text = trimmed;
            }
        }
        ctx.event.chat_id = ctx.event.chat_id.as_str().trim().to_string().into();
        ctx.event.sender.id = ctx.event.sender.id.as_str().trim().to_string().into();

        if ctx.event.text().trim().is_empty() {
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
    async fn halts_on_empty_text_after_trim() {
        let deps = test_deps();
        let mut msg = test_message("c1", "   ");
        msg.content[0].text = Some("   ".to_string());
        let mut ctx = PipelineContext::new(msg);
        let flow = Normalize.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Halt);
        assert!(ctx.halted);
    }

    #[tokio::test]
    async fn trims_and_continues_on_nonempty_text() {
        let deps = test_deps();
        let msg = test_message("c1", "  hello  ");
        let mut ctx = PipelineContext::new(msg);
        let flow = Normalize.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(ctx.event.text(), "hello");
    }
}
