//! Context builder — constructs the system prompt and conversation messages.
//!
//! Builds the system prompt from identity, bootstrap files, memory, and skills,
//! then assembles the full message list for an LLM call.

use std::path::PathBuf;

use agentcore_core::types::{ContentPart, ImageUrl, Message, ToolCall};
use chrono::Utc;
use tracing::debug;

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

// ─────────────────────────────────────────────
// Bootstrap / identity files
// ─────────────────────────────────────────────

/// Files that are automatically injected into the system prompt when present
/// in the workspace root.
const BOOTSTRAP_FILES: &[&str] = &[
    "AGENTS.md",
    "SOUL.md",
    "USER.md",
    "TOOLS.md",
    "IDENTITY.md",
];

// ─────────────────────────────────────────────
// Context builder
// ─────────────────────────────────────────────

/// Builds system prompts and conversation message lists for the agent loop.
pub struct ContextBuilder {
    /// Root workspace directory.
    workspace: PathBuf,
    /// Agent identity name (for the system prompt).
    agent_name: String,
    /// Memory store for long-term facts + history log.
    memory: MemoryStore,
    /// Skills loader for discovering and loading skill files.
    skills: SkillsLoader,
}

impl ContextBuilder {
    /// Create a new context builder.
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new_lazy(&workspace);
        let skills = SkillsLoader::new(&workspace, None);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
        }
    }

    /// Set the built-in skills directory (builder pattern).
    pub fn with_builtin_skills(mut self, path: PathBuf) -> Self {
        self.skills = SkillsLoader::new(&self.workspace, Some(path));
        self
    }

    /// Get a reference to the memory store.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Get a reference to the skills loader.
    pub fn skills(&self) -> &SkillsLoader {
        &self.skills
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt. Sections are joined by `"\n\n---\n\n"`,
    /// each included only if non-empty.
    pub fn build_system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        // 1) Identity
        parts.push(self.build_identity());

        // 2) Bootstrap files
        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if path.is_file() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    debug!(file = filename, "loaded bootstrap file");
                    parts.push(format!("## {filename}\n\n{content}"));
                }
            }
        }

        // 3) Memory context (via MemoryStore)
        let memory_context = self.memory.get_memory_context();
        if !memory_context.is_empty() {
            parts.push(format!("# Memory\n\n{memory_context}"));
        }

        // 4) Always-on skills (full body injected)
        let always_skills = self.skills.get_always_skills();
        if !always_skills.is_empty() {
            let always_content = self.skills.load_skills_for_context(&always_skills);
            if !always_content.is_empty() {
                parts.push(format!("# Active Skills\n\n{always_content}"));
            }
        }

        // 5) Skills summary (XML catalogue — agent uses read_file for on-demand loading)
        let skills_summary = self.skills.build_skills_summary();
        if !skills_summary.is_empty() {
            parts.push(format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. \
                 To use a skill, read its SKILL.md file using the `read_file` tool.\n\
                 Skills with available=\"false\" need dependencies installed first.\n\n\
                 {skills_summary}"
            ));
        }

        parts.join("\n\n---\n\n")
    }

    /// Core identity block: who the agent is, where it runs, where its
    /// persistent memory lives, and how it should use its tools.
    fn build_identity(&self) -> String {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();
        let memory_file = self.memory.memory_file().display();
        let history_file = self.memory.history_file().display();

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant.\n\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\
             - **Long-term memory**: `{memory_file}`\n\
             - **History log**: `{history_file}`\n\n\
             ## Tool usage\n\n\
             Read before you write. Verify a file or resource exists before acting on it. \
             Re-read after edits when accuracy matters. Do not predict what a tool will return — \
             call it and read the result. On failure, diagnose the cause before retrying.",
            name = self.agent_name,
        )
    }

    // ────────────── Message building ──────────────

    /// Build the full message list for an LLM call.
    ///
    /// 1. System prompt.
    /// 2. Session history, verbatim.
    /// 3. Current user message, with a `[Runtime Context]` block appended.
    pub fn build_messages(
        &self,
        history: &[Message],
        user_text: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::new();

        messages.push(Message::system(self.build_system_prompt()));
        messages.extend_from_slice(history);

        let runtime_context = build_runtime_context_block(channel, chat_id);
        let user_message = if media.is_empty() {
            Message::user(format!("{user_text}\n\n{runtime_context}"))
        } else {
            build_multimodal_user_message(user_text, media, &runtime_context)
        };
        messages.push(user_message);

        messages
    }

    /// Append a tool result to the message list.
    pub fn add_tool_result(
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        name: &str,
        result: &str,
    ) {
        messages.push(Message::tool_result(tool_call_id, name, result));
    }

    /// Append an assistant message, with optional tool calls and opaque
    /// reasoning content. `content` is always stored, even when absent —
    /// some providers reject an assistant turn that omits the key entirely.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        reasoning_content: Option<String>,
    ) {
        messages.push(Message::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            reasoning_content,
            tools_used: None,
            timestamp: None,
        });
    }
}

// ─────────────────────────────────────────────
// Runtime context
// ─────────────────────────────────────────────

/// Build the `[Runtime Context]` block appended to the current turn's user message.
fn build_runtime_context_block(channel: &str, chat_id: &str) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M (%A)");
    format!("[Runtime Context]\nCurrent Time: {now} (UTC)\nChannel: {channel}\nChat ID: {chat_id}")
}

// ─────────────────────────────────────────────
// Multimodal helpers
// ─────────────────────────────────────────────

/// Build a user message with base64-encoded images plus a trailing text part
/// that carries the user's text and the runtime context block.
///
/// Non-image files (MIME-sniffed by extension) are silently skipped. If every
/// media path drops, the result falls back to a plain-text message.
fn build_multimodal_user_message(text: &str, media_paths: &[String], runtime_context: &str) -> Message {
    let mut parts = Vec::new();

    for path in media_paths {
        let Some(mime) = guess_image_mime(path) else {
            continue;
        };
        if let Ok(data) = std::fs::read(path) {
            let b64 = base64_encode(&data);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{b64}"),
                    detail: None,
                },
            });
        }
    }

    if parts.is_empty() {
        return Message::user(format!("{text}\n\n{runtime_context}"));
    }

    parts.push(ContentPart::Text {
        text: format!("{text}\n\n{runtime_context}"),
    });

    Message::user_parts(parts)
}

/// MIME-sniff a path by extension; `None` for anything that isn't a
/// recognized image format (including audio, whose transcription is
/// already folded into the text content).
fn guess_image_mime(path: &str) -> Option<&'static str> {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        Some("image/png")
    } else if lower.ends_with(".gif") {
        Some("image/gif")
    } else if lower.ends_with(".webp") {
        Some("image/webp")
    } else if lower.ends_with(".svg") {
        Some("image/svg+xml")
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Base64-encode bytes (standard alphabet, with padding).
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = if chunk.len() > 1 { chunk[1] as u32 } else { 0 };
        let b2 = if chunk.len() > 2 { chunk[2] as u32 } else { 0 };
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((triple >> 18) & 0x3F) as usize]);
        out.push(ALPHABET[((triple >> 12) & 0x3F) as usize]);
        if chunk.len() > 1 {
            out.push(ALPHABET[((triple >> 6) & 0x3F) as usize]);
        } else {
            out.push(b'=');
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(triple & 0x3F) as usize]);
        } else {
            out.push(b'=');
        }
    }
    String::from_utf8(out).unwrap_or_default()
}
