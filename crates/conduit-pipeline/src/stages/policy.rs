use async_trait::async_trait;
use conduit_policy::engine::{resolve, EvalRequest};

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Lowercase and fold every non-alphanumeric run to a single space, so a
/// phrase/token comparison ignores punctuation and case.
fn normalize_for_match(text: &str) -> String {
    let mut out = String::new();
    let mut prev_space = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_space = false;
        } else if !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }
    out.trim().to_string()
}

/// True if `transcript` contains any of `wake_phrases` as a whole-token
/// match, after lowercasing and non-alphanumeric-to-space normalization.
fn wake_phrase_matched(transcript: &str, wake_phrases: &[String]) -> bool {
    let haystack = format!(" {} ", normalize_for_match(transcript));
    wake_phrases.iter().any(|phrase| {
        let needle = normalize_for_match(phrase);
        !needle.is_empty() && haystack.contains(&format!(" {needle} "))
    })
}

/// Evaluates policy for the inbound message and stores the decision in
/// `ctx.decision`. Never halts.
pub struct Policy;

#[async_trait]
impl Stage for Policy {
    fn name(&self) -> &'static str {
        "policy"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let channel = ctx.event.channel.as_str();
        let chat_id = ctx.event.chat_id.as_str();
        let sender = ctx.event.sender.id.as_str();

        let voice_wake_phrase_matched = if channel == "whatsapp" && ctx.event.is_group {
            let snapshot = deps.policy.current();
            let resolved = resolve(&snapshot.spec, channel, chat_id);
            let transcript = ctx
                .event
                .content
                .iter()
                .filter_map(|b| b.transcript.as_deref())
                .collect::<Vec<_>>()
                .join(" ");
            !transcript.is_empty() && wake_phrase_matched(&transcript, &resolved.voice.input.wake_phrases)
        } else {
            false
        };

        let decision = deps.policy.evaluate(&EvalRequest {
            channel,
            chat_id,
            sender,
            is_group: ctx.event.is_group,
            mentioned_bot: ctx.event.mentioned_bot,
            reply_to_bot: ctx.event.reply_to_bot,
            voice_wake_phrase_matched,
        });
        ctx.decision = Some(decision);
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};

    #[tokio::test]
    async fn never_halts_and_stores_decision() {
        let deps = test_deps();
        let msg = test_message("c1", "hello");
        let mut ctx = PipelineContext::new(msg);
        let flow = Policy.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(ctx.decision.is_some());
    }

    #[test]
    fn wake_phrase_matches_whole_token_only() {
        assert!(wake_phrase_matched("hey assistant, what's up", &["assistant".to_string()]));
        assert!(!wake_phrase_matched("the assistants are busy", &["assistant".to_string()]));
    }

    #[test]
    fn wake_phrase_ignores_punctuation_and_case() {
        assert!(wake_phrase_matched("Hey, Jarvis!", &["jarvis".to_string()]));
    }
}
