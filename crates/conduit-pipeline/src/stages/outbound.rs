use async_trait::async_trait;
use conduit_core::types::{ContentKind, OrchestratorIntent};
use conduit_policy::engine::resolve;
use conduit_policy::schema::VoiceOutputMode;
use conduit_security::Stage as SecurityStage;
use tracing::warn;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Takes the first `max_sentences` sentence-terminated chunks of `text`
/// (naive split on `.`/`!`/`?`, terminator retained), then truncates to
/// `max_chars` — the limits the voice policy enforces before TTS synthesis.
fn limit_for_voice(text: &str, max_sentences: Option<u32>, max_chars: Option<u32>) -> String {
    let mut out = match max_sentences {
        Some(n) if n > 0 => {
            let mut result = String::new();
            let mut count = 0usize;
            for part in text.split_inclusive(['.', '!', '?']) {
                if count >= n as usize {
                    break;
                }
                result.push_str(part);
                if !part.trim().is_empty() {
                    count += 1;
                }
            }
            result.trim().to_string()
        }
        _ => text.to_string(),
    };
    if let Some(max_c) = max_chars {
        if out.chars().count() as u32 > max_c {
            out = out.chars().take(max_c as usize).collect();
        }
    }
    out
}

/// Pushes a raw-text capture intent. Extraction, eligibility filters, and
/// persistence all run later in the orchestrator's dispatch lane, off the
/// pipeline hot path.
fn push_raw_capture(ctx: &mut PipelineContext, text: String) {
    if text.trim().is_empty() {
        return;
    }
    ctx.push_intent(OrchestratorIntent::MemoryCapture {
        channel: ctx.event.channel.clone(),
        chat_id: ctx.event.chat_id.clone(),
        sender: ctx.event.sender.id.clone(),
        message_id: ctx.event.id.clone(),
        scope: "raw".to_string(),
        text,
        kind: "raw".to_string(),
        salience: 0.0,
    });
}

/// Final stage: output security, voice policy, the outbound intent itself,
/// and capture-eligible `MemoryCapture` intents.
pub struct Outbound;

impl Outbound {
    fn capture_memory(&self, ctx: &mut PipelineContext, deps: &PipelineDeps, reply_text: Option<&str>) {
        let channel = ctx.event.channel.as_str().to_string();
        if !deps.settings.memory_capture_channels.iter().any(|c| *c == channel) {
            return;
        }

        push_raw_capture(ctx, ctx.event.text());

        if deps.settings.memory_capture_assistant {
            if let Some(text) = reply_text {
                push_raw_capture(ctx, text.to_string());
            }
        }
    }
}

#[async_trait]
impl Stage for Outbound {
    fn name(&self) -> &'static str {
        "outbound"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let Some(reply_text) = ctx.metadata.get("reply_text").and_then(|v| v.as_str()).map(str::to_string) else {
            self.capture_memory(ctx, deps, None);
            return Ok(Flow::Continue);
        };

        let outcome = deps.security.evaluate(SecurityStage::Output, &reply_text);
        let reply_text = if outcome.blocked_by.is_some() {
            "this reply couldn't be sent".to_string()
        } else {
            outcome.text
        };

        let channel = ctx.event.channel.as_str();
        let chat_id = ctx.event.chat_id.as_str();
        let snapshot = deps.policy.current();
        let resolved = resolve(&snapshot.spec, channel, chat_id);

        let inbound_was_voice = ctx.event.content.iter().any(|b| b.kind == ContentKind::Audio);
        let wants_voice = match resolved.voice.output.mode {
            VoiceOutputMode::Always => true,
            VoiceOutputMode::InKind => inbound_was_voice,
            VoiceOutputMode::Text | VoiceOutputMode::Off => false,
        };

        if wants_voice {
            let limited = limit_for_voice(&reply_text, resolved.voice.output.max_sentences, resolved.voice.output.max_chars);
            match deps.tts.synthesize(&limited).await {
                Ok((path, mime_type)) => {
                    ctx.push_intent(OrchestratorIntent::OutboundMedia {
                        channel: ctx.event.channel.clone(),
                        chat_id: ctx.event.chat_id.clone(),
                        path: Some(path),
                        mime_type: Some(mime_type),
                        caption: None,
                        reply_to: Some(ctx.event.id.clone()),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "tts synthesis failed, falling back to text reply");
                    ctx.push_intent(OrchestratorIntent::OutboundText {
                        channel: ctx.event.channel.clone(),
                        chat_id: ctx.event.chat_id.clone(),
                        text: reply_text.clone(),
                        reply_to: Some(ctx.event.id.clone()),
                    });
                }
            }
        } else {
            ctx.push_intent(OrchestratorIntent::OutboundText {
                channel: ctx.event.channel.clone(),
                chat_id: ctx.event.chat_id.clone(),
                text: reply_text.clone(),
                reply_to: Some(ctx.event.id.clone()),
            });
        }

        self.capture_memory(ctx, deps, Some(&reply_text));
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::PipelineSettings;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn no_reply_text_still_continues_without_outbound_intent() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        let flow = Outbound.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(ctx.intents.is_empty());
    }

    #[tokio::test]
    async fn reply_text_emits_outbound_text_by_default() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        ctx.set_meta("reply_text", "hi there");
        Outbound.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(ctx.intents.len(), 1);
        match &ctx.intents[0] {
            OrchestratorIntent::OutboundText { text, .. } => assert_eq!(text, "hi there"),
            other => panic!("expected OutboundText, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn capture_eligible_channel_emits_raw_memory_capture() {
        let mut deps = test_deps();
        deps.settings = PipelineSettings {
            memory_capture_channels: vec!["whatsapp".to_string()],
            ..PipelineSettings::default()
        };
        let msg = test_message("c1", "I love dark roast coffee in the morning.");
        let mut ctx = PipelineContext::new(msg);
        Outbound.run(&mut ctx, &deps).await.unwrap();
        assert!(ctx.intents.iter().any(|i| matches!(i,
            OrchestratorIntent::MemoryCapture { kind, text, .. }
                if kind == "raw" && text == "I love dark roast coffee in the morning.")));
    }

    #[tokio::test]
    async fn assistant_capture_emits_a_second_raw_capture_when_enabled() {
        let mut deps = test_deps();
        deps.settings = PipelineSettings {
            memory_capture_channels: vec!["whatsapp".to_string()],
            memory_capture_assistant: true,
            ..PipelineSettings::default()
        };
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        ctx.set_meta("reply_text", "noted, you prefer mornings");
        Outbound.run(&mut ctx, &deps).await.unwrap();
        let raw_captures: Vec<_> = ctx
            .intents
            .iter()
            .filter(|i| matches!(i, OrchestratorIntent::MemoryCapture { kind, .. } if kind == "raw"))
            .collect();
        assert_eq!(raw_captures.len(), 2);
    }

    #[tokio::test]
    async fn non_capture_channel_emits_no_memory_capture() {
        let deps = test_deps();
        let msg = test_message("c1", "I love dark roast coffee in the morning.");
        let mut ctx = PipelineContext::new(msg);
        Outbound.run(&mut ctx, &deps).await.unwrap();
        assert!(ctx.intents.iter().all(|i| !matches!(i, OrchestratorIntent::MemoryCapture { .. })));
    }
}
