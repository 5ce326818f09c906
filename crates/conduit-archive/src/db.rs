use rusqlite::{Connection, Result};

/// Initialise archive tables. Safe to call on every startup (idempotent) via
/// `CREATE TABLE IF NOT EXISTS` everywhere rather than a migration runner.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_inbound_messages_table(conn)?;
    create_seq_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

/// `(channel, chat_id, message_id)` is the logical primary key,
/// enforced as a `UNIQUE` constraint so `insert` can stay idempotent via
/// `INSERT OR IGNORE`; `id` is a plain surrogate rowid the FTS index syncs
/// against, and `seq` auto-increments per `(channel, chat_id)` partition via
/// the side table below.
fn create_inbound_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS inbound_messages (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            channel              TEXT NOT NULL,
            chat_id              TEXT NOT NULL,
            message_id           TEXT NOT NULL,
            sender_id            TEXT NOT NULL,
            sender_display_name  TEXT,
            text                 TEXT NOT NULL,
            reply_to_message_id  TEXT,
            timestamp            TEXT NOT NULL,
            seq                  INTEGER NOT NULL,
            UNIQUE (channel, chat_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_inbound_seq
            ON inbound_messages(channel, chat_id, seq);
        CREATE INDEX IF NOT EXISTS idx_inbound_reply
            ON inbound_messages(channel, chat_id, reply_to_message_id);
        CREATE INDEX IF NOT EXISTS idx_inbound_timestamp
            ON inbound_messages(timestamp);",
    )
}

/// Per-`(channel, chat_id)` sequence counter, since `seq` must increase
/// monotonically within a chat but SQLite has no per-partition autoincrement.
fn create_seq_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS inbound_seq_counters (
            channel  TEXT NOT NULL,
            chat_id  TEXT NOT NULL,
            next_seq INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (channel, chat_id)
        );",
    )
}

/// FTS5 virtual table mirroring `text`, synced on every insert/purge
/// (external-content, per the "single-writer SQLite-style stores" design
/// note shared with the memory store).
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS inbound_messages_fts
            USING fts5(text, content='inbound_messages', content_rowid='id');",
    )
}
