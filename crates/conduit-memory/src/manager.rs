use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::{MemoryEntry, MemoryKind, MemoryScope, RecallHit, RecallWeights};

/// Normalized-text-prefix length used for recall deduplication.
const DEDUP_PREFIX_LEN: usize = 64;
/// How many candidates to pull from each of the lexical/vector/scope scans
/// before scoring and deduplicating down to `limit`.
const CANDIDATE_POOL_MULTIPLIER: usize = 4;

/// Manages the long-term memory store: persistence of [`MemoryEntry`]
/// records and hybrid lexical+vector recall.
///
/// Thread-safe via a single-writer `Mutex<Connection>` rather than a
/// connection pool, the same pattern the archive store uses.
pub struct MemoryManager {
    db: Mutex<Connection>,
    weights: RecallWeights,
    half_life_days: f64,
}

impl MemoryManager {
    pub fn new(conn: Connection, weights: RecallWeights, half_life_days: f64) -> Self {
        Self {
            db: Mutex::new(conn),
            weights,
            half_life_days,
        }
    }

    /// Persist a memory entry. `scope`/`scope_key` are
    /// resolved by the caller (typically `kind.default_scope()` plus the
    /// chat id or sender id, per the capture pipeline).
    #[allow(clippy::too_many_arguments)]
    pub fn capture(
        &self,
        scope: MemoryScope,
        scope_key: &str,
        kind: MemoryKind,
        text: &str,
        salience: f64,
        source_channel: &str,
        source_chat: &str,
        source_message_id: Option<&str>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now();
        db.execute(
            "INSERT INTO memory_entries
             (scope, scope_key, kind, text, created_at, salience, embedding,
              source_channel, source_chat, source_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8, ?9)",
            params![
                scope.as_str(),
                scope_key,
                kind.as_str(),
                text,
                now.to_rfc3339(),
                salience,
                source_channel,
                source_chat,
                source_message_id,
            ],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO memory_entries_fts(rowid, text) VALUES (?1, ?2)",
            params![id, text],
        )?;
        debug!(id, scope = scope.as_str(), kind = kind.as_str(), "captured memory entry");
        Ok(id)
    }

    /// Attach a computed embedding to an already-persisted entry.
    pub fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let db = self.db.lock().unwrap();
        let blob = encode_embedding(embedding);
        let changed = db.execute(
            "UPDATE memory_entries SET embedding = ?1 WHERE id = ?2",
            params![blob, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id));
        }
        Ok(())
    }

    /// Hybrid recall. `query_embedding` is
    /// `None` when no embedder is configured; `vec_score` then falls back
    /// to 0 for every candidate, matching "0 if absent" in the ranking
    /// pseudocode.
    pub fn recall(
        &self,
        query_text: &str,
        chat_id: &str,
        sender_id: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<RecallHit>> {
        let db = self.db.lock().unwrap();
        let pool_size = (limit * CANDIDATE_POOL_MULTIPLIER).max(limit);

        // Lexical candidates, scope-filtered in SQL: chat-scope only for this
        // chat, user-scope only for this sender, global always.
        let fts_query = fts_sanitize(query_text);
        let mut candidates: Vec<(MemoryEntry, f64)> = Vec::new();

        if !fts_query.is_empty() {
            let mut stmt = db.prepare(
                "SELECT e.id, e.scope, e.scope_key, e.kind, e.text, e.created_at,
                        e.salience, e.embedding, e.source_channel, e.source_chat,
                        e.source_message_id, bm25(memory_entries_fts) AS rank
                 FROM memory_entries e
                 JOIN memory_entries_fts f ON e.id = f.rowid
                 WHERE memory_entries_fts MATCH ?1
                   AND (
                        e.scope = 'global'
                        OR (e.scope = 'chat' AND e.scope_key = ?2)
                        OR (e.scope = 'user' AND e.scope_key = ?3)
                   )
                 ORDER BY rank
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![fts_query, chat_id, sender_id, pool_size as i64],
                |row| {
                    let entry = row_to_entry(row)?;
                    // bm25() is negative and smaller-is-better; normalize to
                    // a positive 0..1-ish score via a simple transform.
                    let rank: f64 = row.get(11)?;
                    Ok((entry, 1.0 / (1.0 + rank.abs())))
                },
            )?;
            for row in rows {
                candidates.push(row?);
            }
        }

        // Also pull the most recent entries in scope, regardless of lexical
        // match, so pure-vector or pure-recency recall still has something
        // to rank (lex_score 0 for these).
        {
            let mut stmt = db.prepare(
                "SELECT id, scope, scope_key, kind, text, created_at, salience,
                        embedding, source_channel, source_chat, source_message_id
                 FROM memory_entries
                 WHERE scope = 'global'
                    OR (scope = 'chat' AND scope_key = ?1)
                    OR (scope = 'user' AND scope_key = ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![chat_id, sender_id, pool_size as i64], |row| {
                row_to_entry(row)
            })?;
            for row in rows {
                let entry = row?;
                if !candidates.iter().any(|(e, _)| e.id == entry.id) {
                    candidates.push((entry, 0.0));
                }
            }
        }
        drop(db);

        let now = chrono::Utc::now();
        let mut scored: Vec<RecallHit> = candidates
            .into_iter()
            .map(|(entry, lex_score)| {
                let vec_score = match (query_embedding, &entry.embedding) {
                    (Some(q), Some(e)) => cosine_similarity(q, e),
                    _ => 0.0,
                };
                let recency = recency_decay(entry.created_at, now, self.half_life_days);
                let final_score = self.weights.lexical * lex_score
                    + self.weights.vector * vec_score
                    + self.weights.salience * entry.salience
                    + self.weights.recency * recency;
                RecallHit {
                    entry,
                    score: final_score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen_prefixes: Vec<String> = Vec::new();
        let mut out = Vec::with_capacity(limit);
        for hit in scored {
            let prefix = normalize_prefix(&hit.entry.text);
            if seen_prefixes.contains(&prefix) {
                continue;
            }
            seen_prefixes.push(prefix);
            out.push(hit);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let value = db
            .query_row("SELECT value FROM memory_kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO memory_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record an idea/backlog capture.
    pub fn capture_idea(&self, chat: &str, text: &str, kind: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO idea_backlog_items (chat, text, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat, text, kind, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn list_ideas(&self, chat: &str, limit: usize) -> Result<Vec<crate::types::IdeaBacklogItem>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat, text, kind, created_at FROM idea_backlog_items
             WHERE chat = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat, limit as i64], |row| {
            let created_at: String = row.get(4)?;
            Ok(crate::types::IdeaBacklogItem {
                id: row.get(0)?,
                chat: row.get(1)?,
                text: row.get(2)?,
                kind: row.get(3)?,
                created_at: parse_rfc3339(&created_at),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let scope: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let embedding: Option<Vec<u8>> = row.get(7)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        scope: scope.parse().unwrap_or(MemoryScope::Chat),
        scope_key: row.get(2)?,
        kind: kind.parse().unwrap_or(MemoryKind::Episodic),
        text: row.get(4)?,
        created_at: parse_rfc3339(&created_at),
        salience: row.get(6)?,
        embedding: embedding.map(|b| decode_embedding(&b)),
        source_channel: row.get(8)?,
        source_chat: row.get(9)?,
        source_message_id: row.get(10)?,
    })
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

/// Little-endian f32 BLOB encoding.
fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// Exponential decay with the configured half-life.
fn recency_decay(created_at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = now.signed_duration_since(created_at).num_seconds() as f64 / 86_400.0;
    0.5f64.powf(age_days.max(0.0) / half_life_days)
}

fn normalize_prefix(text: &str) -> String {
    let normalized: String = text
        .chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    normalized.chars().take(DEDUP_PREFIX_LEN).collect()
}

/// Escape FTS5 query syntax: wrap the whole query as a single quoted phrase
/// so punctuation in user text never breaks the MATCH expression.
fn fts_sanitize(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("\"{}\"", trimmed.replace('"', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn manager() -> MemoryManager {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MemoryManager::new(conn, RecallWeights::default(), 30.0)
    }

    #[test]
    fn capture_and_recall_round_trips() {
        let mgr = manager();
        mgr.capture(
            MemoryScope::User,
            "alice",
            MemoryKind::Semantic,
            "alice prefers dark roast coffee",
            0.8,
            "whatsapp",
            "c1",
            None,
        )
        .unwrap();

        let hits = mgr.recall("dark roast coffee", "c1", "alice", None, 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].entry.text.contains("dark roast"));
    }

    #[test]
    fn chat_scoped_entry_invisible_to_other_chat() {
        let mgr = manager();
        mgr.capture(
            MemoryScope::Chat,
            "c1",
            MemoryKind::Episodic,
            "the team decided to ship on friday",
            0.6,
            "telegram",
            "c1",
            None,
        )
        .unwrap();

        let hits = mgr.recall("ship friday", "c2", "bob", None, 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn global_entry_visible_everywhere() {
        let mgr = manager();
        mgr.capture(
            MemoryScope::Global,
            "*",
            MemoryKind::Reflective,
            "the assistant should always confirm destructive actions",
            0.9,
            "discord",
            "c9",
            None,
        )
        .unwrap();

        let hits = mgr.recall("confirm destructive actions", "anywhere", "anyone", None, 5).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn recall_deduplicates_near_identical_text() {
        let mgr = manager();
        for _ in 0..3 {
            mgr.capture(
                MemoryScope::User,
                "alice",
                MemoryKind::Preference,
                "alice likes jazz music on sunday mornings",
                0.7,
                "whatsapp",
                "c1",
                None,
            )
            .unwrap();
        }
        let hits = mgr.recall("jazz music", "c1", "alice", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn embedding_round_trips_through_blob_encoding() {
        let mgr = manager();
        let id = mgr
            .capture(
                MemoryScope::User,
                "alice",
                MemoryKind::Semantic,
                "alice's favorite color is teal",
                0.5,
                "whatsapp",
                "c1",
                None,
            )
            .unwrap();
        mgr.set_embedding(id, &[0.1, 0.2, 0.3]).unwrap();
        let hits = mgr
            .recall("favorite color", "c1", "alice", Some(&[0.1, 0.2, 0.3]), 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn idea_backlog_round_trips() {
        let mgr = manager();
        mgr.capture_idea("c1", "build a recall dashboard", "idea").unwrap();
        let ideas = mgr.list_ideas("c1", 10).unwrap();
        assert_eq!(ideas.len(), 1);
        assert_eq!(ideas[0].kind, "idea");
    }

    #[test]
    fn kv_set_then_get_returns_latest_value() {
        let mgr = manager();
        mgr.kv_set("last_seen_qr", "abc").unwrap();
        mgr.kv_set("last_seen_qr", "def").unwrap();
        assert_eq!(mgr.kv_get("last_seen_qr").unwrap(), Some("def".to_string()));
    }

    #[test]
    fn default_scope_matches_invariant() {
        assert_eq!(MemoryKind::Semantic.default_scope(), MemoryScope::User);
        assert_eq!(MemoryKind::Procedural.default_scope(), MemoryScope::User);
        assert_eq!(MemoryKind::Episodic.default_scope(), MemoryScope::Chat);
        assert_eq!(MemoryKind::Emotional.default_scope(), MemoryScope::Chat);
        assert_eq!(MemoryKind::Reflective.default_scope(), MemoryScope::Global);
    }
}
