use async_trait::async_trait;
use conduit_core::types::{ChannelTag, ChatId, OrchestratorIntent};
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// If this is the first message ever archived for `(channel, chat_id)`,
/// appends a notification intent to the configured owner's DM. Never halts.
///
/// Archive assigns `seq` starting at 1 per `(channel, chat_id)` partition,
/// so `seq == 1` on the just-archived record is equivalent to the chat not
/// having appeared in the archive's distinct-chat set before this message —
/// checking it this way avoids a second full distinct-chats query per
/// message.
pub struct NewChatNotify;

#[async_trait]
impl Stage for NewChatNotify {
    fn name(&self) -> &'static str {
        "new_chat_notify"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let (Some(owner_channel), Some(owner_chat_id)) =
            (&deps.settings.owner_notify_channel, &deps.settings.owner_notify_chat_id)
        else {
            return Ok(Flow::Continue);
        };

        let record = match deps.archive.lookup(
            ctx.event.channel.as_str(),
            ctx.event.chat_id.as_str(),
            ctx.event.id.as_str(),
        ) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "new chat notify lookup failed");
                return Ok(Flow::Continue);
            }
        };
        let is_first_message = record.map(|r| r.seq == 1).unwrap_or(false);
        if !is_first_message {
            return Ok(Flow::Continue);
        }

        let who = ctx.event.sender.display_name.clone().unwrap_or_else(|| ctx.event.sender.id.as_str().to_string());
        ctx.push_intent(OrchestratorIntent::OutboundText {
            channel: ChannelTag::from(owner_channel.as_str()),
            chat_id: ChatId::from(owner_chat_id.as_str()),
            text: format!(
                "new chat on {}: {} ({})",
                ctx.event.channel.as_str(),
                ctx.event.chat_id.as_str(),
                who
            ),
            reply_to: None,
        });
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::archive::Archive;
    use crate::deps::PipelineSettings;
    use crate::test_support::{test_deps, test_message};

    fn deps_with_owner_notify() -> PipelineDeps {
        let mut deps = test_deps();
        deps.settings = PipelineSettings {
            owner_notify_channel: Some("whatsapp".to_string()),
            owner_notify_chat_id: Some("owner-dm".to_string()),
            ..PipelineSettings::default()
        };
        deps
    }

    #[tokio::test]
    async fn first_message_in_a_chat_notifies_owner() {
        let deps = deps_with_owner_notify();
        let msg = test_message("new-chat", "hello");
        let mut ctx = PipelineContext::new(msg);
        Archive.run(&mut ctx, &deps).await.unwrap();
        NewChatNotify.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(ctx.intents.len(), 1);
    }

    #[tokio::test]
    async fn second_message_in_same_chat_does_not_notify() {
        let deps = deps_with_owner_notify();
        let first = test_message("existing-chat", "first");
        let mut ctx1 = PipelineContext::new(first);
        Archive.run(&mut ctx1, &deps).await.unwrap();
        NewChatNotify.run(&mut ctx1, &deps).await.unwrap();

        let second = test_message("existing-chat", "second");
        let mut ctx2 = PipelineContext::new(second);
        Archive.run(&mut ctx2, &deps).await.unwrap();
        NewChatNotify.run(&mut ctx2, &deps).await.unwrap();
        assert!(ctx2.intents.is_empty());
    }

    #[tokio::test]
    async fn no_owner_configured_never_notifies() {
        let deps = test_deps();
        let msg = test_message("new-chat", "hello");
        let mut ctx = PipelineContext::new(msg);
        Archive.run(&mut ctx, &deps).await.unwrap();
        NewChatNotify.run(&mut ctx, &deps).await.unwrap();
        assert!(ctx.intents.is_empty());
    }
}
