use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced one turn of short-term session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One line of a `sessions/<channel>_<chat>.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionTurn {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_round_trips_through_json() {
        let turn = SessionTurn::user("hi", Utc::now());
        let json = serde_json::to_string(&turn).unwrap();
        let back: SessionTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hi");
        assert_eq!(back.role, Role::User);
    }
}
