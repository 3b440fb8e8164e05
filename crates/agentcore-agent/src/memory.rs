//! Memory system — long-term memory and append-only history.
//!
//! The agent's memory is file-based, two files under `workspace/memory/`:
//! - **MEMORY.md** — long-term facts, fully rewritten on each consolidation.
//! - **HISTORY.md** — append-only paragraphs, one per consolidation, for substring search.
//!
//! The context builder reads `MEMORY.md` on every prompt build. Both files are
//! written only by the consolidation protocol, never by the turn loop directly.

use std::path::{Path, PathBuf};

use tracing::debug;

// ─────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────

/// File-based memory store for the agent.
pub struct MemoryStore {
    /// The `memory/` directory inside the workspace.
    memory_dir: PathBuf,
    /// Path to the long-term memory file.
    memory_file: PathBuf,
    /// Path to the append-only history log.
    history_file: PathBuf,
}

impl MemoryStore {
    /// Create a new memory store, creating the `memory/` directory if needed.
    pub fn new(workspace: &Path) -> std::io::Result<Self> {
        let memory_dir = workspace.join("memory");
        if !memory_dir.exists() {
            std::fs::create_dir_all(&memory_dir)?;
            debug!(dir = %memory_dir.display(), "created memory directory");
        }
        Ok(Self::paths(memory_dir))
    }

    /// Create a MemoryStore without creating the directory (for read-only checks).
    pub fn new_lazy(workspace: &Path) -> Self {
        Self::paths(workspace.join("memory"))
    }

    fn paths(memory_dir: PathBuf) -> Self {
        let memory_file = memory_dir.join("MEMORY.md");
        let history_file = memory_dir.join("HISTORY.md");
        Self {
            memory_dir,
            memory_file,
            history_file,
        }
    }

    // ────────────── Long-term memory ──────────────

    /// Read the long-term memory file. Returns empty string if absent.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Overwrite the entire long-term memory file.
    pub fn write_long_term(&self, content: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        std::fs::write(&self.memory_file, content)
    }

    // ────────────── History log ──────────────

    /// Append one paragraph to the history log, followed by a blank line.
    pub fn append_history(&self, entry: &str) -> std::io::Result<()> {
        self.ensure_dir()?;
        let mut existing = std::fs::read_to_string(&self.history_file).unwrap_or_default();
        if !existing.is_empty() && !existing.ends_with('\n') {
            existing.push('\n');
        }
        existing.push_str(entry.trim_end());
        existing.push_str("\n\n");
        std::fs::write(&self.history_file, existing)
    }

    /// Build the memory context string spliced into the system prompt.
    ///
    /// Returns `""` if `MEMORY.md` is absent or empty.
    pub fn get_memory_context(&self) -> String {
        let long_term = self.read_long_term();
        if long_term.trim().is_empty() {
            String::new()
        } else {
            format!("## Long-term Memory\n{long_term}")
        }
    }

    /// Path to the memory directory.
    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Path to the long-term memory file.
    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    /// Path to the history log file.
    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Ensure the memory directory exists.
    fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.memory_dir.exists() {
            std::fs::create_dir_all(&self.memory_dir)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("workspace");
        std::fs::create_dir(&ws).unwrap();

        let store = MemoryStore::new(&ws).unwrap();
        assert!(store.memory_dir().exists());
        assert!(store.memory_dir().is_dir());
    }

    #[test]
    fn test_read_long_term_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        assert_eq!(store.read_long_term(), "");
    }

    #[test]
    fn test_write_and_read_long_term() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.write_long_term("User likes Rust.").unwrap();
        assert_eq!(store.read_long_term(), "User likes Rust.");

        store.write_long_term("User prefers dark mode.").unwrap();
        assert_eq!(store.read_long_term(), "User prefers dark mode.");
    }

    #[test]
    fn test_append_history_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.append_history("[2026-01-10 10:00] Discussed the roadmap.").unwrap();
        let content = std::fs::read_to_string(store.history_file()).unwrap();
        assert!(content.starts_with("[2026-01-10 10:00] Discussed the roadmap."));
        assert!(content.ends_with("\n\n"));
    }

    #[test]
    fn test_append_history_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.append_history("[2026-01-10 10:00] First entry.").unwrap();
        store.append_history("[2026-01-11 10:00] Second entry.").unwrap();

        let content = std::fs::read_to_string(store.history_file()).unwrap();
        let first_idx = content.find("First entry.").unwrap();
        let second_idx = content.find("Second entry.").unwrap();
        assert!(first_idx < second_idx);
    }

    #[test]
    fn test_get_memory_context_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        assert_eq!(store.get_memory_context(), "");
    }

    #[test]
    fn test_get_memory_context_long_term() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.write_long_term("User prefers dark mode.").unwrap();
        let ctx = store.get_memory_context();
        assert!(ctx.starts_with("## Long-term Memory"));
        assert!(ctx.contains("User prefers dark mode."));
    }

    #[test]
    fn test_get_memory_context_whitespace_only_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();

        store.write_long_term("   \n  \n  ").unwrap();
        assert_eq!(store.get_memory_context(), "");
    }

    #[test]
    fn test_new_lazy_no_create() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("noexist");
        let store = MemoryStore::new_lazy(&ws);
        assert!(!store.memory_dir().exists());
        assert_eq!(store.read_long_term(), "");
    }
}
