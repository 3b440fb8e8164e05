//! Memory consolidation — folds turn history into long-term memory via a
//! dedicated LLM call, rather than ad-hoc summarization inline in the loop.
//!
//! The protocol never touches `session.messages`: it only ever reads a
//! window of them, and on success advances `session.last_consolidated` to
//! mark how much of that window has been folded in.

use agentcore_core::types::{Message, Session, ToolDefinition};
use agentcore_providers::traits::{LlmProvider, LlmRequestConfig};
use serde_json::json;
use tracing::{debug, warn};

use crate::memory::MemoryStore;

const CONSOLIDATION_SYSTEM_PROMPT: &str = "\
You are the memory consolidation agent for an AI assistant. You are given the \
assistant's current long-term memory and a window of conversation that has \
happened since the last consolidation. Produce an updated long-term memory \
(concise, durable facts and preferences worth keeping — not a transcript) and \
a short history entry summarizing what this window of conversation was about. \
Call `save_memory` exactly once with both fields filled in.";

/// Fold `session`'s unconsolidated message window into long-term memory.
///
/// `archive_all` (used by `/new`) folds the entire tail; otherwise only the
/// portion beyond `memory_window / 2` trailing messages is folded, keeping
/// the most recent half in the live window. A no-op window (nothing new to
/// fold) returns `true` without calling the provider.
///
/// On success, advances `session.last_consolidated`. Never touches
/// `session.messages`. Returns `false` if the model made no tool call, the
/// tool call's arguments didn't parse, or a memory file write failed — in
/// all of those cases the cursor is left unchanged.
pub async fn consolidate(
    session: &mut Session,
    memory: &MemoryStore,
    provider: &dyn LlmProvider,
    model: &str,
    archive_all: bool,
    memory_window: usize,
) -> bool {
    let keep_count = if archive_all { 0 } else { memory_window / 2 };
    let total = session.messages.len();

    if total <= keep_count {
        return true;
    }
    let unconsolidated = total.saturating_sub(session.last_consolidated);
    if unconsolidated == 0 {
        return true;
    }

    let archive_end = total - keep_count;
    if session.last_consolidated >= archive_end {
        return true;
    }
    let window = &session.messages[session.last_consolidated..archive_end];

    let entries: Vec<String> = window.iter().filter_map(format_entry).collect();
    let messages = build_consolidation_messages(memory, &entries);
    let tool_defs = [save_memory_tool_definition()];
    let config = LlmRequestConfig {
        max_tokens: 2048,
        temperature: 0.3,
    };

    let response = provider.chat(&messages, Some(&tool_defs), model, &config).await;

    if !response.has_tool_calls() {
        warn!(session = %session.key, "consolidation produced no tool call");
        return false;
    }

    let Some(call) = response.tool_calls.iter().find(|c| c.function.name == "save_memory") else {
        warn!(session = %session.key, "consolidation tool call was not save_memory");
        return false;
    };

    let Ok(args) = serde_json::from_str::<serde_json::Value>(&call.function.arguments) else {
        warn!(session = %session.key, "consolidation tool args were not valid JSON");
        return false;
    };
    let Some(args) = args.as_object() else {
        warn!(session = %session.key, "consolidation tool args were not a JSON object");
        return false;
    };

    if let Some(history_entry) = args.get("history_entry").and_then(|v| v.as_str()) {
        if !history_entry.trim().is_empty() {
            if let Err(e) = memory.append_history(history_entry) {
                warn!(session = %session.key, error = %e, "failed to append consolidation history entry");
                return false;
            }
        }
    }

    if let Some(memory_update) = args.get("memory_update").and_then(|v| v.as_str()) {
        if memory_update != memory.read_long_term() {
            if let Err(e) = memory.write_long_term(memory_update) {
                warn!(session = %session.key, error = %e, "failed to write consolidated long-term memory");
                return false;
            }
        }
    }

    session.last_consolidated = if archive_all { 0 } else { archive_end };
    debug!(session = %session.key, last_consolidated = session.last_consolidated, "consolidation complete");
    true
}

/// Render one message as a consolidation-prompt line, or `None` if it carries
/// no readable content (e.g. an assistant turn that was pure tool calls).
fn format_entry(msg: &Message) -> Option<String> {
    let content = msg.text_content();
    if content.trim().is_empty() {
        return None;
    }

    let ts = msg
        .timestamp()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown-time".to_string());
    let role = msg.role().to_uppercase();

    let tools_suffix = match msg {
        Message::Assistant {
            tools_used: Some(tools),
            ..
        } if !tools.is_empty() => format!(" [tools: {}]", tools.join(", ")),
        _ => String::new(),
    };

    Some(format!("[{ts}] {role}{tools_suffix}: {content}"))
}

/// Build the two-message consolidation prompt: instruction + current memory
/// plus the formatted window.
fn build_consolidation_messages(memory: &MemoryStore, entries: &[String]) -> Vec<Message> {
    let current_memory = memory.read_long_term();
    let current_memory = if current_memory.trim().is_empty() {
        "(empty)".to_string()
    } else {
        current_memory
    };

    let history_block = if entries.is_empty() {
        "(no new messages)".to_string()
    } else {
        entries.join("\n")
    };

    let user_content = format!(
        "# Current long-term memory\n\n{current_memory}\n\n\
         # Conversation since last consolidation\n\n{history_block}\n\n\
         Call `save_memory` with the updated long-term memory and a short history entry for this window."
    );

    vec![
        Message::system(CONSOLIDATION_SYSTEM_PROMPT),
        Message::user(user_content),
    ]
}

/// The single tool offered to the model during consolidation.
fn save_memory_tool_definition() -> ToolDefinition {
    ToolDefinition::new(
        "save_memory",
        "Persist the updated long-term memory and a history entry describing this conversation window.",
        json!({
            "type": "object",
            "properties": {
                "history_entry": {
                    "type": "string",
                    "description": "A short paragraph describing what happened in this window, appended to the history log."
                },
                "memory_update": {
                    "type": "string",
                    "description": "The full updated long-term memory, replacing the current one."
                }
            },
            "required": ["history_entry", "memory_update"]
        }),
    )
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
