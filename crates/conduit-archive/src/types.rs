use chrono::{DateTime, Utc};
use conduit_core::types::ArchiveRecord;

/// A full-text search hit over the archive, used by context-window assembly when the query is
/// free text rather than a reply-chain walk.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: ArchiveRecord,
    pub rank: f64,
}

/// A single distinct chat observed since some timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub channel: String,
    pub chat_id: String,
}

pub(crate) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
