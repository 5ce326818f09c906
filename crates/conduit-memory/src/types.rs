use serde::{Deserialize, Serialize};

/// Memory scope. Determines which queries may recall an
/// entry: `chat` entries are visible only within the originating chat,
/// `user` entries follow the sender across chats, `global` entries are
/// always visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Global,
    User,
    Chat,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Global => "global",
            MemoryScope::User => "user",
            MemoryScope::Chat => "chat",
        }
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "user" => Ok(Self::User),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown memory scope: {other}")),
        }
    }
}

/// Memory kind. Each kind has a default scope assignment
/// per the data-model invariant and the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Episodic,
    Semantic,
    Procedural,
    Preference,
    Decision,
    Emotional,
    Reflective,
}

impl MemoryKind {
    /// Default scope for an entry of this kind. `semantic`/`procedural`
    /// default to `user`, `episodic`/`emotional` to `chat`, `reflective` to
    /// `global`. `preference`/`decision` aren't named
    /// explicitly there; they follow `semantic`'s user-scoped default since
    /// both describe durable facts about a person rather than one chat.
    pub fn default_scope(&self) -> MemoryScope {
        match self {
            MemoryKind::Semantic | MemoryKind::Procedural => MemoryScope::User,
            MemoryKind::Preference | MemoryKind::Decision => MemoryScope::User,
            MemoryKind::Episodic | MemoryKind::Emotional => MemoryScope::Chat,
            MemoryKind::Reflective => MemoryScope::Global,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
            MemoryKind::Preference => "preference",
            MemoryKind::Decision => "decision",
            MemoryKind::Emotional => "emotional",
            MemoryKind::Reflective => "reflective",
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "preference" => Ok(Self::Preference),
            "decision" => Ok(Self::Decision),
            "emotional" => Ok(Self::Emotional),
            "reflective" => Ok(Self::Reflective),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// A single long-term memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub scope: MemoryScope,
    pub scope_key: String,
    pub kind: MemoryKind,
    pub text: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub salience: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub source_channel: String,
    pub source_chat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,
}

/// A candidate entry proposed by an [`crate::extractor::Extractor`], before
/// the eligibility/confidence/salience/anti-injection filters run.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    pub kind: MemoryKind,
    pub text: String,
    pub confidence: f64,
    pub salience: f64,
}

/// One scored recall result.
#[derive(Debug, Clone)]
pub struct RecallHit {
    pub entry: MemoryEntry,
    pub score: f64,
}

/// Weights for the hybrid recall ranking. Conservative defaults
/// `(0.35, 0.35, 0.15, 0.15)`, tunable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct RecallWeights {
    pub lexical: f64,
    pub vector: f64,
    pub salience: f64,
    pub recency: f64,
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            lexical: 0.35,
            vector: 0.35,
            salience: 0.15,
            recency: 0.15,
        }
    }
}

/// An idea/backlog capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaBacklogItem {
    pub id: i64,
    pub chat: String,
    pub text: String,
    pub kind: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
