pub mod engine;
pub mod rule;

pub use engine::{SecurityEngine, SecurityError, StageOutcome};
pub use rule::{Action, RuleSpec, Stage};
