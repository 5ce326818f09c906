use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent) via
/// `CREATE TABLE IF NOT EXISTS` everywhere rather than a migration runner.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_memory_entries_table(conn)?;
    create_fts_index(conn)?;
    create_kv_table(conn)?;
    create_idea_backlog_table(conn)?;
    Ok(())
}

fn create_memory_entries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_entries (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            scope            TEXT NOT NULL,
            scope_key        TEXT NOT NULL,
            kind             TEXT NOT NULL,
            text             TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            salience         REAL NOT NULL DEFAULT 0.5,
            embedding        BLOB,
            source_channel   TEXT NOT NULL,
            source_chat      TEXT NOT NULL,
            source_message_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memory_scope
            ON memory_entries(scope, scope_key);",
    )
}

/// FTS5 virtual table mirroring `text`, synced on every insert/delete.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_entries_fts
            USING fts5(text, content='memory_entries', content_rowid='id');",
    )
}

/// `memory_kv` — key-value scratch space.
fn create_kv_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_kv (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
}

/// `idea_backlog_items`.
fn create_idea_backlog_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS idea_backlog_items (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat       TEXT NOT NULL,
            text       TEXT NOT NULL,
            kind       TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_backlog_chat
            ON idea_backlog_items(chat, created_at DESC);",
    )
}
