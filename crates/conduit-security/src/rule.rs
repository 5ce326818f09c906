use serde::{Deserialize, Serialize};

/// Which point in the pipeline a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Tool,
    Output,
}

/// What happens when a rule's pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Halts the stage immediately; no further rules in this stage run.
    Block,
    /// Mutates the text; evaluation continues so later rules can also match.
    Redact,
    /// Records a telemetry flag; text passes through unmodified.
    Flag,
}

/// One curated security rule, as loaded from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub stage: Stage,
    pub pattern: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_spec_round_trips_through_json() {
        let spec = RuleSpec {
            id: "r-001".into(),
            stage: Stage::Input,
            pattern: r"(?i)ignore previous instructions".into(),
            action: Action::Block,
            replacement: None,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: RuleSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "r-001");
        assert_eq!(back.stage, Stage::Input);
        assert_eq!(back.action, Action::Block);
    }
}
