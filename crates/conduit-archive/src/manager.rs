use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use conduit_core::types::{ArchiveRecord, Message};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;
use crate::types::{parse_rfc3339, ChatRef, SearchHit};

/// Append-only inbound message archive + context-window queries.
///
/// Thread-safe via a single-writer `Mutex<Connection>` — the same
/// "single-writer SQLite-style stores" pattern as the memory store: writes
/// are serialized per process, reads are concurrent in the sense that they
/// share the same connection but never block on network I/O.
pub struct ArchiveStore {
    db: Mutex<Connection>,
}

impl ArchiveStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    /// Insert one inbound message. Idempotent on `(channel, chat_id,
    /// message_id)` — a re-delivered message is silently ignored
    /// rather than erroring, since channel adapters may redeliver on
    /// reconnect.
    pub fn insert(&self, message: &Message) -> Result<()> {
        let db = self.db.lock().unwrap();
        let channel = message.channel.as_str();
        let chat_id = message.chat_id.as_str();

        let already_present: Option<i64> = db
            .query_row(
                "SELECT id FROM inbound_messages WHERE channel = ?1 AND chat_id = ?2 AND message_id = ?3",
                params![channel, chat_id, message.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if already_present.is_some() {
            return Ok(());
        }

        let seq = next_seq(&db, channel, chat_id)?;
        let reply_to = message.reply_to.as_ref().map(|r| r.message_id.as_str().to_string());
        let sender_display_name = message.sender.display_name.clone();

        db.execute(
            "INSERT INTO inbound_messages
                (channel, chat_id, message_id, sender_id, sender_display_name, text,
                 reply_to_message_id, timestamp, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                channel,
                chat_id,
                message.id.as_str(),
                message.sender.id.as_str(),
                sender_display_name,
                message.text(),
                reply_to,
                message.timestamp.to_rfc3339(),
                seq,
            ],
        )?;
        let rowid = db.last_insert_rowid();
        db.execute(
            "INSERT INTO inbound_messages_fts(rowid, text) VALUES (?1, ?2)",
            params![rowid, message.text()],
        )?;
        debug!(channel, chat_id, message_id = message.id.as_str(), seq, "archived inbound message");
        Ok(())
    }

    pub fn lookup(&self, channel: &str, chat_id: &str, message_id: &str) -> Result<Option<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let record = db
            .query_row(
                "SELECT channel, chat_id, message_id, sender_id, sender_display_name, text,
                        reply_to_message_id, timestamp, seq
                 FROM inbound_messages
                 WHERE channel = ?1 AND chat_id = ?2 AND message_id = ?3",
                params![channel, chat_id, message_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The `limit` most recent records with `seq < target.seq`, oldest-first
    /// — the ambient context window used when a message has no
    /// reply-to reference.
    pub fn lookup_messages_before(&self, channel: &str, chat_id: &str, message_id: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let target_seq: Option<i64> = db
            .query_row(
                "SELECT seq FROM inbound_messages WHERE channel = ?1 AND chat_id = ?2 AND message_id = ?3",
                params![channel, chat_id, message_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(target_seq) = target_seq else {
            return Ok(Vec::new());
        };

        let mut stmt = db.prepare(
            "SELECT channel, chat_id, message_id, sender_id, sender_display_name, text,
                    reply_to_message_id, timestamp, seq
             FROM inbound_messages
             WHERE channel = ?1 AND chat_id = ?2 AND seq < ?3
             ORDER BY seq DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![channel, chat_id, target_seq, limit as i64], row_to_record)?;
        let mut records: Vec<ArchiveRecord> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }

    /// Follow `reply_to_message_id` backward up to `max_depth` hops,
    /// starting at and including `starting_message_id`.
    pub fn walk_reply_chain(&self, channel: &str, chat_id: &str, starting_message_id: &str, max_depth: usize) -> Result<Vec<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let mut chain = Vec::new();
        let mut cursor = Some(starting_message_id.to_string());
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(message_id) = cursor {
            if chain.len() >= max_depth || !seen.insert(message_id.clone()) {
                break;
            }
            let record: Option<ArchiveRecord> = db
                .query_row(
                    "SELECT channel, chat_id, message_id, sender_id, sender_display_name, text,
                            reply_to_message_id, timestamp, seq
                     FROM inbound_messages
                     WHERE channel = ?1 AND chat_id = ?2 AND message_id = ?3",
                    params![channel, chat_id, message_id],
                    row_to_record,
                )
                .optional()?;
            match record {
                Some(r) => {
                    cursor = r.reply_to_message_id.as_ref().map(|m| m.as_str().to_string());
                    chain.push(r);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    /// Distinct `(channel, chat_id)` pairs with at least one message since
    /// `since`.
    pub fn distinct_chats(&self, channel: &str, since: DateTime<Utc>) -> Result<HashSet<ChatRef>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT channel, chat_id FROM inbound_messages
             WHERE channel = ?1 AND timestamp >= ?2",
        )?;
        let rows = stmt.query_map(params![channel, since.to_rfc3339()], |row| {
            Ok(ChatRef {
                channel: row.get(0)?,
                chat_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    /// Free-text search over the archive's FTS index, scoped to one chat.
    /// The natural use of the full-text index alongside the reply-chain/
    /// ambient window queries.
    pub fn search(&self, channel: &str, chat_id: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let fts_query = format!("\"{}\"", trimmed.replace('"', ""));
        let mut stmt = db.prepare(
            "SELECT m.channel, m.chat_id, m.message_id, m.sender_id, m.sender_display_name, m.text,
                    m.reply_to_message_id, m.timestamp, m.seq, bm25(inbound_messages_fts) AS rank
             FROM inbound_messages m
             JOIN inbound_messages_fts f ON m.id = f.rowid
             WHERE m.channel = ?1 AND m.chat_id = ?2 AND inbound_messages_fts MATCH ?3
             ORDER BY rank
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![channel, chat_id, fts_query, limit as i64], |row| {
            let record = row_to_record(row)?;
            let rank: f64 = row.get(9)?;
            Ok(SearchHit { record, rank })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Retention sweep: delete every row older than `now - max_age`,
    /// keeping the FTS index in sync.
    pub fn purge_older_than(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id FROM inbound_messages WHERE timestamp < ?1")?;
        let ids: Vec<i64> = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for id in &ids {
            db.execute("DELETE FROM inbound_messages_fts WHERE rowid = ?1", params![id])?;
        }
        let deleted = db.execute("DELETE FROM inbound_messages WHERE timestamp < ?1", params![cutoff.to_rfc3339()])?;
        debug!(deleted, cutoff = %cutoff, "archive retention sweep");
        Ok(deleted)
    }
}

fn next_seq(db: &Connection, channel: &str, chat_id: &str) -> Result<i64> {
    db.execute(
        "INSERT INTO inbound_seq_counters (channel, chat_id, next_seq) VALUES (?1, ?2, 2)
         ON CONFLICT(channel, chat_id) DO UPDATE SET next_seq = next_seq + 1",
        params![channel, chat_id],
    )?;
    let seq: i64 = db.query_row(
        "SELECT next_seq FROM inbound_seq_counters WHERE channel = ?1 AND chat_id = ?2",
        params![channel, chat_id],
        |row| row.get(0),
    )?;
    // the row now holds the *next* seq to hand out; the one just consumed
    // is one less.
    Ok(seq - 1)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchiveRecord> {
    let timestamp: String = row.get(7)?;
    let reply_to: Option<String> = row.get(6)?;
    Ok(ArchiveRecord {
        channel: row.get::<_, String>(0)?.into(),
        chat_id: row.get::<_, String>(1)?.into(),
        message_id: row.get::<_, String>(2)?.into(),
        sender_id: row.get::<_, String>(3)?.into(),
        sender_display_name: row.get(4)?,
        text: row.get(5)?,
        reply_to_message_id: reply_to.map(Into::into),
        timestamp: parse_rfc3339(&timestamp),
        seq: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use conduit_core::types::{ContentBlock, Identity, ReplyRef};
    use std::collections::HashMap;

    fn store() -> ArchiveStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ArchiveStore::new(conn)
    }

    fn message(id: &str, chat: &str, text: &str, reply_to: Option<&str>, ts: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            channel: "whatsapp".into(),
            chat_id: chat.into(),
            sender: Identity::new("sender-1"),
            content: vec![ContentBlock::text(text)],
            reply_to: reply_to.map(|r| ReplyRef {
                message_id: r.into(),
                text: None,
                sender: None,
            }),
            timestamp: ts,
            is_group: false,
            mentioned_bot: false,
            reply_to_bot: false,
            participant: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let store = store();
        let msg = message("m1", "c1", "hello there", None, Utc::now());
        store.insert(&msg).unwrap();
        let record = store.lookup("whatsapp", "c1", "m1").unwrap().unwrap();
        assert_eq!(record.text, "hello there");
        assert_eq!(record.seq, 1);
    }

    #[test]
    fn insert_is_idempotent_on_primary_key() {
        let store = store();
        let msg = message("m1", "c1", "hello there", None, Utc::now());
        store.insert(&msg).unwrap();
        store.insert(&msg).unwrap();
        let before = store.lookup_messages_before("whatsapp", "c1", "nonexistent", 10).unwrap();
        assert!(before.is_empty());
        let record = store.lookup("whatsapp", "c1", "m1").unwrap().unwrap();
        assert_eq!(record.seq, 1);
    }

    #[test]
    fn seq_increments_per_chat_partition() {
        let store = store();
        let base = Utc::now();
        store.insert(&message("m1", "c1", "a", None, base)).unwrap();
        store.insert(&message("m2", "c1", "b", None, base)).unwrap();
        store.insert(&message("m1", "c2", "x", None, base)).unwrap();

        assert_eq!(store.lookup("whatsapp", "c1", "m2").unwrap().unwrap().seq, 2);
        assert_eq!(store.lookup("whatsapp", "c2", "m1").unwrap().unwrap().seq, 1);
    }

    #[test]
    fn lookup_messages_before_returns_oldest_first() {
        let store = store();
        let base = Utc::now();
        store.insert(&message("m1", "c1", "one", None, base)).unwrap();
        store.insert(&message("m2", "c1", "two", None, base)).unwrap();
        store.insert(&message("m3", "c1", "three", None, base)).unwrap();

        let before = store.lookup_messages_before("whatsapp", "c1", "m3", 10).unwrap();
        let texts: Vec<&str> = before.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn walk_reply_chain_follows_backward() {
        let store = store();
        let base = Utc::now();
        store.insert(&message("m1", "c1", "root", None, base)).unwrap();
        store.insert(&message("m2", "c1", "reply one", Some("m1"), base)).unwrap();
        store.insert(&message("m3", "c1", "reply two", Some("m2"), base)).unwrap();

        let chain = store.walk_reply_chain("whatsapp", "c1", "m3", 10).unwrap();
        let texts: Vec<&str> = chain.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["reply two", "reply one", "root"]);
    }

    #[test]
    fn walk_reply_chain_respects_max_depth() {
        let store = store();
        let base = Utc::now();
        store.insert(&message("m1", "c1", "root", None, base)).unwrap();
        store.insert(&message("m2", "c1", "reply one", Some("m1"), base)).unwrap();
        store.insert(&message("m3", "c1", "reply two", Some("m2"), base)).unwrap();

        let chain = store.walk_reply_chain("whatsapp", "c1", "m3", 2).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn distinct_chats_reflects_recent_activity_only() {
        let store = store();
        let old = Utc::now() - chrono::Duration::days(2);
        let recent = Utc::now();
        store.insert(&message("m1", "c1", "old", None, old)).unwrap();
        store.insert(&message("m2", "c2", "new", None, recent)).unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let chats = store.distinct_chats("whatsapp", since).unwrap();
        assert_eq!(chats.len(), 1);
        assert!(chats.contains(&ChatRef {
            channel: "whatsapp".to_string(),
            chat_id: "c2".to_string()
        }));
    }

    #[test]
    fn purge_older_than_removes_stale_rows_and_fts_entries() {
        let store = store();
        let old = Utc::now() - chrono::Duration::days(40);
        let recent = Utc::now();
        store.insert(&message("m1", "c1", "ancient message", None, old)).unwrap();
        store.insert(&message("m2", "c1", "fresh message", None, recent)).unwrap();

        let deleted = store.purge_older_than(chrono::Duration::days(30)).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.lookup("whatsapp", "c1", "m1").unwrap().is_none());
        assert!(store.lookup("whatsapp", "c1", "m2").unwrap().is_some());

        let hits = store.search("whatsapp", "c1", "ancient", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_finds_matching_text() {
        let store = store();
        store.insert(&message("m1", "c1", "the quarterly report is due friday", None, Utc::now())).unwrap();
        let hits = store.search("whatsapp", "c1", "quarterly report", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
