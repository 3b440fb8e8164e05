//! Session persistence and caching.
//!
//! File format: JSONL under `<sessions_dir>/{safe_key}.jsonl`
//! - Line 1: `{"_type":"metadata","key":"...","created_at":"...","updated_at":"...","metadata":{},"last_consolidated":0}`
//! - Line 2+: one chat message per line, in `Message` wire format.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Subdirectory of the legacy data home still checked for a migration on
/// first miss. The exact path is part of the migration contract and must
/// not be rewritten into a different literal.
const LEGACY_SESSIONS_SUBPATH: &str = ".nanobot/sessions";

// ─────────────────────────────────────────────
// Session metadata (first line of JSONL)
// ─────────────────────────────────────────────

/// Metadata header written as the first line of each JSONL session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "_type")]
    record_type: String,
    #[serde(default)]
    key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_consolidated: usize,
}

// ─────────────────────────────────────────────
// SessionManager
// ─────────────────────────────────────────────

/// Manages conversation sessions with in-memory caching and JSONL persistence.
///
/// Thread-safe via `RwLock` — multiple readers, exclusive writer. Caching
/// may be invalidated at any time; the file on disk is the source of truth.
pub struct SessionManager {
    /// Directory where `.jsonl` session files are stored.
    sessions_dir: PathBuf,
    /// In-memory cache of active sessions.
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    /// Create a new session manager.
    ///
    /// `sessions_dir` defaults to a global fallback path if `None`; callers
    /// that keep sessions workspace-relative should always pass `Some`.
    /// The directory is created if it doesn't exist.
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::get_sessions_path);
        std::fs::create_dir_all(&dir)?;

        Ok(SessionManager {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Get an existing session or create a new one.
    ///
    /// 1. Check in-memory cache
    /// 2. Try to load from disk (checking the legacy location on a miss)
    /// 3. Create a new empty session
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Persist a session: update the cache, then atomically replace its
    /// JSONL file on disk. Save failures are propagated to the caller —
    /// unlike the cache, disk state is never silently out of sync.
    pub fn save(&self, session: &Session) -> std::io::Result<()> {
        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(session.key.clone(), session.clone());
        }
        self.save_to_disk(session)
    }

    /// Drop a session from the in-memory cache without touching disk. The
    /// next `get_or_create` for this key re-reads the file.
    pub fn invalidate(&self, key: &str) {
        let mut cache = self.cache.write().unwrap();
        cache.remove(key);
    }

    /// Turn-aligned effective history for building LLM context.
    ///
    /// 1. Take `messages[last_consolidated:]` (the unconsolidated tail).
    /// 2. Keep only the last `max_messages` of that tail.
    /// 3. Left-trim so the first entry is always a `user` message (or
    ///    return empty if no `user` entry remains) — an LLM turn cannot
    ///    start mid-assistant-response or mid-tool-result.
    /// 4. Strip transport-only fields (`timestamp`, `tools_used`,
    ///    `reasoning_content`) that have no place in the protocol sent to
    ///    the model.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let tail = if session.last_consolidated >= session.messages.len() {
            &session.messages[session.messages.len()..]
        } else {
            &session.messages[session.last_consolidated..]
        };

        let windowed: &[Message] = if tail.len() <= max_messages {
            tail
        } else {
            &tail[tail.len() - max_messages..]
        };

        let start = windowed
            .iter()
            .position(|m| matches!(m, Message::User { .. }));

        let trimmed = match start {
            Some(idx) => &windowed[idx..],
            None => &[],
        };

        trimmed.iter().cloned().map(strip_for_llm).collect()
    }

    /// List all sessions from disk, sorted by `updated_at` descending.
    /// Reads only the metadata line of each file — no message parsing.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read sessions directory: {}", e);
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }

            if let Ok(file) = std::fs::File::open(&path) {
                let reader = std::io::BufReader::new(file);
                if let Some(Ok(line)) = reader.lines().next() {
                    if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                        let key = if meta.key.is_empty() {
                            path.file_stem()
                                .and_then(|s| s.to_str())
                                .map(|s| s.replace('_', ":"))
                                .unwrap_or_default()
                        } else {
                            meta.key
                        };

                        summaries.push(SessionSummary {
                            key,
                            created_at: meta.created_at,
                            updated_at: meta.updated_at,
                            path: path.clone(),
                        });
                    }
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Get the JSONL file path for a session key, within the primary
    /// sessions directory.
    fn session_path(&self, key: &str) -> PathBuf {
        self.session_path_in(&self.sessions_dir, key)
    }

    fn session_path_in(&self, dir: &std::path::Path, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(&key.replace(':', "_"));
        dir.join(format!("{}.jsonl", safe_key))
    }

    /// Load a session from a JSONL file, checking the legacy data home on
    /// a primary-directory miss and migrating it in place if found.
    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            self.migrate_legacy_session(key);
        }
        if !path.exists() {
            return None;
        }

        self.read_session_file(&path, key)
    }

    /// Check `<home>/.nanobot/sessions/` for a session file matching `key`
    /// and move it into the primary sessions directory if found. Migration
    /// failure must never prevent a fresh session from being created — all
    /// errors here are logged and swallowed.
    fn migrate_legacy_session(&self, key: &str) {
        let Some(home) = utils::home_dir() else {
            return;
        };
        let legacy_dir = home.join(LEGACY_SESSIONS_SUBPATH);
        let legacy_path = self.session_path_in(&legacy_dir, key);
        if !legacy_path.exists() {
            return;
        }

        let target = self.session_path(key);
        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("legacy session migration failed to create target dir: {}", e);
                return;
            }
        }

        match std::fs::rename(&legacy_path, &target) {
            Ok(()) => {
                debug!(
                    "migrated legacy session '{}' from {} to {}",
                    key,
                    legacy_path.display(),
                    target.display()
                );
            }
            Err(e) => {
                warn!(
                    "legacy session migration failed for '{}': {}",
                    key, e
                );
            }
        }
    }

    fn read_session_file(&self, path: &std::path::Path, key: &str) -> Option<Session> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open session file {}: {}", path.display(), e);
                return None;
            }
        };

        let reader = std::io::BufReader::new(file);
        let mut session = Session::new(key);
        let mut messages = Vec::new();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue,
            };

            if line.trim().is_empty() {
                continue;
            }

            if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                if meta.record_type == "metadata" {
                    session.created_at = meta.created_at;
                    session.updated_at = meta.updated_at;
                    session.metadata = meta.metadata;
                    session.last_consolidated = meta.last_consolidated;
                    continue;
                }
            }

            if let Ok(msg) = serde_json::from_str::<Message>(&line) {
                messages.push(msg);
            }
        }

        session.messages = messages;
        debug!(
            "Loaded session '{}' with {} messages from disk",
            key,
            session.messages.len()
        );
        Some(session)
    }

    /// Write a session to its JSONL file via write-then-rename so a reader
    /// (or a crash mid-write) never observes a partially written file.
    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let tmp_path = path.with_extension("jsonl.tmp");

        {
            let mut file = std::fs::File::create(&tmp_path)?;

            let meta = SessionMetadata {
                record_type: "metadata".to_string(),
                key: session.key.clone(),
                created_at: session.created_at,
                updated_at: session.updated_at,
                metadata: session.metadata.clone(),
                last_consolidated: session.last_consolidated,
            };
            writeln!(file, "{}", serde_json::to_string(&meta)?)?;

            for msg in &session.messages {
                writeln!(file, "{}", serde_json::to_string(msg)?)?;
            }
            file.flush()?;
        }

        std::fs::rename(&tmp_path, &path)?;

        debug!(
            "Saved session '{}' ({} messages) to {}",
            session.key,
            session.messages.len(),
            path.display()
        );
        Ok(())
    }
}

/// Clear fields that are only meaningful for turn persistence, not for the
/// wire protocol sent to the LLM.
fn strip_for_llm(mut msg: Message) -> Message {
    msg.set_timestamp_none();
    msg.clear_persistence_only_fields();
    msg
}

impl Message {
    /// Clear the timestamp field. Used when preparing history for the LLM,
    /// which has no use for persistence-only bookkeeping.
    fn set_timestamp_none(&mut self) {
        match self {
            Message::System { timestamp, .. }
            | Message::User { timestamp, .. }
            | Message::Assistant { timestamp, .. }
            | Message::Tool { timestamp, .. } => *timestamp = None,
        }
    }

    /// Clear fields that exist only for turn-persistence bookkeeping
    /// (`tools_used`, `reasoning_content`) and have no place in the
    /// protocol object sent to the LLM.
    fn clear_persistence_only_fields(&mut self) {
        if let Message::Assistant {
            tools_used,
            reasoning_content,
            ..
        } = self
        {
            *tools_used = None;
            *reasoning_content = None;
        }
    }
}

/// Summary of a session for listing purposes.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    /// Session key (e.g. `"cli:default"`).
    pub key: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
    /// Path to the JSONL file.
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        (mgr, dir)
    }

    fn add(mgr: &SessionManager, key: &str, msg: Message) {
        let mut session = mgr.get_or_create(key);
        session.messages.push(msg);
        session.updated_at = Utc::now();
        mgr.save(&session).unwrap();
    }

    #[test]
    fn test_get_or_create_new_session() {
        let (mgr, _dir) = make_manager();
        let session = mgr.get_or_create("cli:12345");
        assert_eq!(session.key, "cli:12345");
        assert!(session.messages.is_empty());
        assert_eq!(session.last_consolidated, 0);
    }

    #[test]
    fn test_get_or_create_returns_cached() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hello"));
        let session = mgr.get_or_create("test:1");
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_save_appends() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hello"));
        add(&mgr, "test:1", Message::assistant("hi there!"));

        let session = mgr.get_or_create("test:1");
        assert_eq!(session.messages.len(), 2);
    }

    #[test]
    fn test_get_history_window_and_order() {
        let (mgr, _dir) = make_manager();
        for i in 0..10 {
            add(&mgr, "test:1", Message::user(format!("msg {}", i)));
        }

        let history = mgr.get_history("test:1", 3);
        assert_eq!(history.len(), 3);
        match &history[0] {
            Message::User {
                content: crate::types::MessageContent::Text(text),
                ..
            } => assert_eq!(text, "msg 7"),
            _ => panic!("Expected user message"),
        }
    }

    #[test]
    fn test_get_history_less_than_max() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("one"));
        add(&mgr, "test:1", Message::user("two"));

        let history = mgr.get_history("test:1", 50);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_get_history_respects_last_consolidated() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("archived one"));
        add(&mgr, "test:1", Message::assistant("archived reply"));
        add(&mgr, "test:1", Message::user("fresh one"));

        let mut session = mgr.get_or_create("test:1");
        session.last_consolidated = 2;
        mgr.save(&session).unwrap();

        let history = mgr.get_history("test:1", 50);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text_content(), "fresh one");
    }

    #[test]
    fn test_get_history_left_trims_to_first_user() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hi"));
        add(&mgr, "test:1", Message::assistant("hello"));
        add(&mgr, "test:1", Message::tool_result("call_1", "read_file", "contents"));
        add(&mgr, "test:1", Message::user("next question"));

        // Window of 3 starts mid-assistant-turn; must trim to the user msg.
        let history = mgr.get_history("test:1", 3);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text_content(), "next question");
    }

    #[test]
    fn test_get_history_empty_when_no_user_in_window() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hi"));
        add(&mgr, "test:1", Message::assistant("hello"));

        let history = mgr.get_history("test:1", 1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_get_history_strips_timestamp() {
        let (mgr, _dir) = make_manager();
        let mut msg = Message::user("hi");
        msg.set_timestamp(Utc::now());
        let mut session = mgr.get_or_create("test:1");
        session.messages.push(msg);
        mgr.save(&session).unwrap();

        let history = mgr.get_history("test:1", 50);
        assert!(history[0].timestamp().is_none());
    }

    #[test]
    fn test_clear_session() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hello"));
        add(&mgr, "test:1", Message::assistant("hi"));

        let mut session = mgr.get_or_create("test:1");
        session.clear();
        mgr.save(&session).unwrap();

        let session = mgr.get_or_create("test:1");
        assert!(session.messages.is_empty());
        assert_eq!(session.last_consolidated, 0);
    }

    #[test]
    fn test_invalidate_forces_disk_reload() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "test:1", Message::user("hello"));
        mgr.invalidate("test:1");
        let session = mgr.get_or_create("test:1");
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();

        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            add(&mgr, "cli:42", Message::system("You are an assistant."));
            add(&mgr, "cli:42", Message::user("Hello"));
            add(&mgr, "cli:42", Message::assistant("Hi! How can I help?"));
        }

        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            let session = mgr.get_or_create("cli:42");
            assert_eq!(session.messages.len(), 3);
            assert_eq!(session.key, "cli:42");
        }
    }

    #[test]
    fn test_session_file_format() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();

        add(&mgr, "cli:local", Message::user("test message"));

        let path = dir.path().join("cli_local.jsonl");
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["_type"], "metadata");

        let msg: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"], "test message");
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        add(&mgr, "cli:local", Message::user("hi"));
        assert!(!dir.path().join("cli_local.jsonl.tmp").exists());
    }

    #[test]
    fn test_list_sessions() {
        let dir = tempdir().unwrap();
        let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();

        add(&mgr, "cli:1", Message::user("a"));
        add(&mgr, "cli:2", Message::user("b"));
        add(&mgr, "cli:3", Message::user("c"));

        let sessions = mgr.list_sessions();
        assert_eq!(sessions.len(), 3);
        let keys: Vec<&str> = sessions.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"cli:1"));
        assert!(keys.contains(&"cli:2"));
        assert!(keys.contains(&"cli:3"));
    }

    #[test]
    fn test_multiple_sessions_independent() {
        let (mgr, _dir) = make_manager();
        add(&mgr, "a:1", Message::user("hello a"));
        add(&mgr, "b:2", Message::user("hello b"));
        add(&mgr, "b:2", Message::user("hello b again"));

        assert_eq!(mgr.get_history("a:1", 50).len(), 1);
        assert_eq!(mgr.get_history("b:2", 50).len(), 2);
    }

    #[test]
    fn test_clear_persists_to_disk() {
        let dir = tempdir().unwrap();

        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            add(&mgr, "test:1", Message::user("hello"));
            add(&mgr, "test:1", Message::assistant("hi"));
            let mut session = mgr.get_or_create("test:1");
            session.clear();
            mgr.save(&session).unwrap();
        }

        {
            let mgr = SessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            let session = mgr.get_or_create("test:1");
            assert!(session.messages.is_empty());
        }
    }

    #[test]
    fn test_legacy_session_migration() {
        let home = tempdir().unwrap();
        let primary = tempdir().unwrap();

        let legacy_dir = home.path().join(LEGACY_SESSIONS_SUBPATH);
        std::fs::create_dir_all(&legacy_dir).unwrap();
        let legacy_file = legacy_dir.join("cli_legacy.jsonl");
        std::fs::write(
            &legacy_file,
            "{\"_type\":\"metadata\",\"key\":\"cli:legacy\",\"created_at\":\"2024-01-01T00:00:00Z\",\"updated_at\":\"2024-01-01T00:00:00Z\"}\n{\"role\":\"user\",\"content\":\"from the old days\"}\n",
        )
        .unwrap();

        // SAFETY: serial test process; scoped narrowly around the migration check.
        std::env::set_var("HOME", home.path());

        let mgr = SessionManager::new(Some(primary.path().to_path_buf())).unwrap();
        let session = mgr.get_or_create("cli:legacy");

        assert_eq!(session.messages.len(), 1);
        assert!(!legacy_file.exists(), "legacy file should have been moved");
        assert!(primary.path().join("cli_legacy.jsonl").exists());
    }
}
