use async_trait::async_trait;
use conduit_core::types::ArchiveRecord;
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::responder::{ContextEntry, ContextWindows};
use crate::stage::{Flow, Stage};

const CONTEXT_TEXT_TRUNCATE_CHARS: usize = 1_000;

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

fn to_entry(record: ArchiveRecord) -> ContextEntry {
    ContextEntry {
        sender_display_name: record.sender_display_name,
        text: truncate_chars(&record.text, CONTEXT_TEXT_TRUNCATE_CHARS),
        timestamp: record.timestamp,
    }
}

/// Builds the reply-thread and ambient context windows and stores them in
/// `event.metadata["context_windows"]`.
pub struct ReplyContextEnrich;

#[async_trait]
impl Stage for ReplyContextEnrich {
    fn name(&self) -> &'static str {
        "reply_context_enrich"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let channel = ctx.event.channel.as_str().to_string();
        let chat_id = ctx.event.chat_id.as_str().to_string();

        let reply_thread = if let Some(reply_to) = &ctx.event.reply_to {
            match deps.archive.walk_reply_chain(
                &channel,
                &chat_id,
                reply_to.message_id.as_str(),
                deps.settings.reply_context_window_limit,
            ) {
                Ok(records) => records.into_iter().map(to_entry).collect(),
                Err(e) => {
                    warn!(error = %e, "reply chain lookup failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let ambient = if ctx.event.is_group {
            match deps.archive.lookup_messages_before(
                &channel,
                &chat_id,
                ctx.event.id.as_str(),
                deps.settings.ambient_window_limit,
            ) {
                Ok(records) => records.into_iter().map(to_entry).collect(),
                Err(e) => {
                    warn!(error = %e, "ambient window lookup failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let windows = ContextWindows { reply_thread, ambient };
        ctx.set_meta("context_windows", &windows);
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::archive::Archive;
    use crate::test_support::{test_deps, test_message};
    use conduit_core::types::ReplyRef;

    #[tokio::test]
    async fn ambient_window_only_populated_for_group_chats() {
        let deps = test_deps();
        let mut first = test_message("c1", "first");
        first.is_group = true;
        let mut ctx1 = PipelineContext::new(first);
        Archive.run(&mut ctx1, &deps).await.unwrap();

        let mut second = test_message("c1", "second");
        second.is_group = true;
        let mut ctx2 = PipelineContext::new(second);
        Archive.run(&mut ctx2, &deps).await.unwrap();
        ReplyContextEnrich.run(&mut ctx2, &deps).await.unwrap();

        let windows: ContextWindows =
            serde_json::from_value(ctx2.metadata["context_windows"].clone()).unwrap();
        assert_eq!(windows.ambient.len(), 1);
        assert_eq!(windows.ambient[0].text, "first");
    }

    #[tokio::test]
    async fn reply_thread_populated_when_reply_to_set() {
        let deps = test_deps();
        let original = test_message("c1", "original text");
        let original_id = original.id.clone();
        let mut ctx1 = PipelineContext::new(original);
        Archive.run(&mut ctx1, &deps).await.unwrap();

        let mut reply = test_message("c1", "a reply");
        reply.reply_to = Some(ReplyRef {
            message_id: original_id,
            text: None,
            sender: None,
        });
        let mut ctx2 = PipelineContext::new(reply);
        Archive.run(&mut ctx2, &deps).await.unwrap();
        ReplyContextEnrich.run(&mut ctx2, &deps).await.unwrap();

        let windows: ContextWindows =
            serde_json::from_value(ctx2.metadata["context_windows"].clone()).unwrap();
        assert_eq!(windows.reply_thread.len(), 1);
        assert_eq!(windows.reply_thread[0].text, "original text");
    }
}
