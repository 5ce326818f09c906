use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{instrument, warn};

use crate::error::{Result, SessionError};
use crate::types::SessionTurn;

const MAX_ENTRIES_PER_FILE: usize = 50;

/// Append-only short-term session history, one file per `(channel, chat_id)`
/// under `<root>/<channel>_<chat_id>.jsonl`. Each line is
/// one JSON-encoded [`SessionTurn`]; files are capped at
/// [`MAX_ENTRIES_PER_FILE`] entries with the oldest pruned on overflow.
///
/// A single mutex serializes all reads/writes across every session file —
/// traffic through this store is low-volume per-chat turn history, not a hot
/// path, so a global lock is simpler than per-file locking and avoids races
/// between a read-modify-write append and a concurrent read.
pub struct SessionStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: Mutex::new(()) }
    }

    fn path_for(&self, channel: &str, chat_id: &str) -> PathBuf {
        let safe_chat = chat_id.replace('/', "_");
        self.root.join(format!("{channel}_{safe_chat}.jsonl"))
    }

    /// Append one turn, pruning the oldest entries beyond the 50-entry cap.
    #[instrument(skip(self, turn), fields(channel, chat_id))]
    pub fn append(&self, channel: &str, chat_id: &str, turn: SessionTurn) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.path_for(channel, chat_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SessionError::Io { path: path.display().to_string(), source: e })?;
        }

        let mut turns = read_turns(&path)?;
        turns.push(turn);
        if turns.len() > MAX_ENTRIES_PER_FILE {
            let overflow = turns.len() - MAX_ENTRIES_PER_FILE;
            turns.drain(0..overflow);
        }

        write_turns(&path, &turns)
    }

    /// Read the full (already-capped) history for one chat, oldest first.
    /// Returns an empty vec if the file does not exist yet.
    #[instrument(skip(self), fields(channel, chat_id))]
    pub fn read(&self, channel: &str, chat_id: &str) -> Result<Vec<SessionTurn>> {
        let _guard = self.lock.lock().unwrap();
        read_turns(&self.path_for(channel, chat_id))
    }

    /// Delete a chat's session file entirely (used by owner `/reset`-style
    /// admin commands).
    pub fn clear(&self, channel: &str, chat_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.path_for(channel, chat_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Io { path: path.display().to_string(), source: e }),
        }
    }
}

fn read_turns(path: &Path) -> Result<Vec<SessionTurn>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SessionError::Io { path: path.display().to_string(), source: e }),
    };

    let mut turns = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| SessionError::Io { path: path.display().to_string(), source: e })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionTurn>(&line) {
            Ok(turn) => turns.push(turn),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed session line"),
        }
    }
    Ok(turns)
}

fn write_turns(path: &Path, turns: &[SessionTurn]) -> Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| SessionError::Io { path: tmp_path.display().to_string(), source: e })?;

    for turn in turns {
        let line = serde_json::to_string(turn).map_err(|e| SessionError::Malformed { path: path.display().to_string(), source: e })?;
        writeln!(file, "{line}").map_err(|e| SessionError::Io { path: tmp_path.display().to_string(), source: e })?;
    }
    file.flush().map_err(|e| SessionError::Io { path: tmp_path.display().to_string(), source: e })?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| SessionError::Io { path: path.display().to_string(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn append_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.append("whatsapp", "123@s.whatsapp.net", SessionTurn::user("hi", Utc::now())).unwrap();
        store.append("whatsapp", "123@s.whatsapp.net", SessionTurn::assistant("hello", Utc::now())).unwrap();
        let turns = store.read("whatsapp", "123@s.whatsapp.net").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "hi");
        assert_eq!(turns[1].content, "hello");
    }

    #[test]
    fn overflow_prunes_oldest_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        for i in 0..(MAX_ENTRIES_PER_FILE + 5) {
            store.append("telegram", "c1", SessionTurn::user(format!("msg-{i}"), Utc::now())).unwrap();
        }
        let turns = store.read("telegram", "c1").unwrap();
        assert_eq!(turns.len(), MAX_ENTRIES_PER_FILE);
        assert_eq!(turns[0].content, "msg-5");
        assert_eq!(turns.last().unwrap().content, format!("msg-{}", MAX_ENTRIES_PER_FILE + 4));
    }

    #[test]
    fn read_missing_file_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.read("discord", "nope").unwrap().is_empty());
    }

    #[test]
    fn clear_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.append("feishu", "c1", SessionTurn::user("hi", Utc::now())).unwrap();
        store.clear("feishu", "c1").unwrap();
        assert!(store.read("feishu", "c1").unwrap().is_empty());
    }
}
