use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::types::OrchestratorIntent;
use conduit_security::Stage as SecurityStage;

use crate::context::PipelineContext;
use crate::deps::PipelineDeps;
use crate::error::Result;
use crate::stage::{Flow, Stage};

/// Runs the input stage of the security rule engine against the raw text.
/// A `block` match halts with a pre-formatted rejection
/// intent; a `redact` match mutates `event.metadata.sanitized_text` instead
/// of the canonical text, honoring the "must not mutate `event` after
/// Normalize" rule's carve-out for enrichment fields.
pub struct InputSecurity;

#[async_trait]
impl Stage for InputSecurity {
    fn name(&self) -> &'static str {
        "input_security"
    }

    async fn run(&self, ctx: &mut PipelineContext, deps: &PipelineDeps) -> Result<Flow> {
        let text = ctx.event.text();
        let outcome = deps.security.evaluate(SecurityStage::Input, &text);

        if let Some(rule_id) = outcome.blocked_by {
            ctx.push_intent(OrchestratorIntent::MetricEvent {
                name: "pipeline.input_blocked".to_string(),
                labels: HashMap::from([("rule_id".to_string(), rule_id)]),
                value: 1.0,
            });
            ctx.push_intent(OrchestratorIntent::OutboundText {
                channel: ctx.event.channel.clone(),
                chat_id: ctx.event.chat_id.clone(),
                text: "this message can't be processed".to_string(),
                reply_to: Some(ctx.event.id.clone()),
            });
            ctx.halt();
            return Ok(Flow::Halt);
        }

        if outcome.text != text {
            ctx.event
                .metadata
                .insert("sanitized_text".to_string(), serde_json::Value::String(outcome.text));
        }

        for rule_id in outcome.flagged {
            ctx.push_intent(OrchestratorIntent::MetricEvent {
                name: "pipeline.input_flagged".to_string(),
                labels: HashMap::from([("rule_id".to_string(), rule_id)]),
                value: 1.0,
            });
        }

        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_deps, test_message};
    use conduit_security::{Action, RuleSpec, SecurityEngine};
    use std::sync::Arc;

    fn deps_with_rules(rules: Vec<RuleSpec>) -> PipelineDeps {
        let mut deps = test_deps();
        deps.security = Arc::new(SecurityEngine::compile(rules).unwrap());
        deps
    }

    #[tokio::test]
    async fn block_rule_halts_with_rejection_intent() {
        let deps = deps_with_rules(vec![RuleSpec {
            id: "r1".to_string(),
            stage: SecurityStage::Input,
            pattern: "secret".to_string(),
            action: Action::Block,
            replacement: None,
        }]);
        let msg = test_message("c1", "my secret is 42");
        let mut ctx = PipelineContext::new(msg);
        let flow = InputSecurity.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Halt);
        assert!(ctx.intents.iter().any(|i| matches!(i, OrchestratorIntent::OutboundText { .. })));
    }

    #[tokio::test]
    async fn redact_rule_sets_sanitized_text_without_halting() {
        let deps = deps_with_rules(vec![RuleSpec {
            id: "r1".to_string(),
            stage: SecurityStage::Input,
            pattern: "\\d{3}-\\d{2}-\\d{4}".to_string(),
            action: Action::Redact,
            replacement: Some("[redacted]".to_string()),
        }]);
        let msg = test_message("c1", "my ssn is 123-45-6789");
        let mut ctx = PipelineContext::new(msg);
        let flow = InputSecurity.run(&mut ctx, &deps).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            ctx.event.metadata.get("sanitized_text").and_then(|v| v.as_str()),
            Some("my ssn is [redacted]")
        );
    }

    #[tokio::test]
    async fn clean_text_passes_through_unmodified() {
        let deps = test_deps();
        let msg = test_message("c1", "hello there");
        let mut ctx = PipelineContext::new(msg);
        assert_eq!(InputSecurity.run(&mut ctx, &deps).await.unwrap(), Flow::Continue);
        assert!(!ctx.event.metadata.contains_key("sanitized_text"));
    }
}
