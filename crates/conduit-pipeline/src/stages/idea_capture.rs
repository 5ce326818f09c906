use async_trait::async_trait;
use conduit_core::types::OrchestratorIntent;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

const IDEA_EMOJI: &str = "\u{1F4A1}"; // 💡
const BACKLOG_EMOJI: &str = "\u{1F4CC}"; // 📌

/// If the first token of the message matches a configured idea/backlog
/// intent word, captures the whole message as a `MemoryCapture` intent and
/// acknowledges with a `Reaction`, then halts.
pub struct IdeaCapture;

#[async_trait]
impl Stage for IdeaCapture {
    fn name(&self) -> &'static str {
        "idea_capture"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let text = ctx.event.text();
        let Some(first_token) = text.split_whitespace().next() else {
            return Ok(Flow::Continue);
        };
        let first_token = first_token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();

        let kind = if deps.settings.idea_intent_words.iter().any(|w| w.to_lowercase() == first_token) {
            "idea"
        } else if deps.settings.backlog_intent_words.iter().any(|w| w.to_lowercase() == first_token) {
            "backlog"
        } else {
            return Ok(Flow::Continue);
        };
        let emoji = if kind == "idea" { IDEA_EMOJI } else { BACKLOG_EMOJI };

        ctx.push_intent(OrchestratorIntent::MemoryCapture {
            channel: ctx.event.channel.clone(),
            chat_id: ctx.event.chat_id.clone(),
            sender: ctx.event.sender.id.clone(),
            message_id: ctx.event.id.clone(),
            scope: "chat".to_string(),
            text,
            kind: kind.to_string(),
            salience: 1.0,
        });
        ctx.push_intent(OrchestratorIntent::Reaction {
            channel: ctx.event.channel.clone(),
            chat_id: ctx.event.chat_id.clone(),
            message_id: ctx.event.id.clone(),
            emoji: emoji.to_string(),
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
    async fn idea_word_halts_and_emits_both_intents() {
        let deps = test_deps();
        let msg = test_message("c1", "idea: build a faster archive index");
        let mut ctx = PipelineContext::new(msg);
        let flow = IdeaCapture.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Halt);
        assert_eq!(ctx.intents.len(), 2);
        assert!(matches!(ctx.intents[0], OrchestratorIntent::MemoryCapture { .. }));
        assert!(matches!(ctx.intents[1], OrchestratorIntent::Reaction { .. }));
    }

    #[tokio::test]
    async fn backlog_word_is_case_insensitive() {
        let deps = test_deps();
        let msg = test_message("c1", "TODO fix the bug");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(IdeaCapture.run(&mut ctx, &deps).await.unwrap(), Flow::Halt);
    }

    #[tokio::test]
    async fn non_matching_first_token_passes_through() {
        let deps = test_deps();
        let msg = test_message("c1", "hello there");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(IdeaCapture.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
        assert!(ctx.intents.is_empty());
    }
}
