use std::collections::HashMap;

use conduit_core::types::{Message, OrchestratorIntent, PolicyDecision};

/// Mutable carrier threaded through every stage of one pipeline run.
///
/// `event` may be replaced by the Normalize stage but must not be mutated by
/// any stage after that except for enrichment fields written into
/// `event.metadata`. `metadata` is pipeline-scoped
/// scratch space distinct from `event.metadata` — it holds values computed
/// during this run that are not part of the canonical message (e.g. the
/// Responder stage's `reply_text`).
pub struct PipelineContext {
    pub event: Message,
    pub decision: Option<PolicyDecision>,
    pub intents: Vec<OrchestratorIntent>,
    pub halted: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PipelineContext {
    pub fn new(event: Message) -> Self {
        Self {
            event,
            decision: None,
            intents: Vec::new(),
            halted: false,
            metadata: HashMap::new(),
        }
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn push_intent(&mut self, intent: OrchestratorIntent) {
        self.intents.push(intent);
    }

    pub fn set_meta(&mut self, key: &str, value: impl serde::Serialize) {
        if let Ok(json) = serde_json::to_value(value) {
            self.metadata.insert(key.to_string(), json);
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn into_intents(self) -> Vec<OrchestratorIntent> {
        self.intents
    }
}
