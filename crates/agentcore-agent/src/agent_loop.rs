//! Agent loop — the outer message loop and the LLM ↔ tool-calling inner loop.
//!
//! Receives inbound messages, builds context, calls the LLM, dispatches
//! tool calls, and publishes outbound responses. Also owns slash-command
//! handling (`/new`, `/help`) and triggers background memory consolidation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, info, warn};

use agentcore_core::bus::queue::{ConsumeResult, MessageBus};
use agentcore_core::bus::types::{InboundMessage, OutboundMessage};
use agentcore_core::session::manager::SessionManager;
use agentcore_core::types::{Message, Session, ToolCall};
use agentcore_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::consolidation;
use crate::context::ContextBuilder;
use crate::memory::MemoryStore;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Default number of recent messages consulted when no consolidation has
/// run yet, and the threshold at which background consolidation triggers.
const DEFAULT_MEMORY_WINDOW: usize = 20;

const HELP_TEXT: &str = "\
Commands:
/new — archive this conversation to long-term memory and start a fresh session
/help — show this message";

// ─────────────────────────────────────────────
// Consolidation coordination
// ─────────────────────────────────────────────

/// Per-session-key coordination for background consolidation: a live-set so
/// at most one background consolidation runs per key, plus a refcounted
/// mutex map so a concurrent `/new` and background pass on the same key
/// serialize instead of racing on the memory files.
struct ConsolidationState {
    locks: std::sync::Mutex<HashMap<String, (Arc<tokio::sync::Mutex<()>>, usize)>>,
    in_flight: std::sync::Mutex<HashSet<String>>,
}

impl ConsolidationState {
    fn new() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        let entry = locks
            .entry(key.to_string())
            .or_insert_with(|| (Arc::new(tokio::sync::Mutex::new(())), 0));
        entry.1 += 1;
        entry.0.clone()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap();
        let drop_entry = match locks.get_mut(key) {
            Some(entry) => {
                entry.1 = entry.1.saturating_sub(1);
                entry.1 == 0
            }
            None => false,
        };
        if drop_entry {
            locks.remove(key);
        }
    }

    fn try_mark_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().unwrap().insert(key.to_string())
    }

    fn clear_in_flight(&self, key: &str) {
        self.in_flight.lock().unwrap().remove(key);
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,
    memory_window: usize,
    tools: ToolRegistry,
    context: ContextBuilder,
    memory: Arc<MemoryStore>,
    sessions: Arc<SessionManager>,
    message_tool: Arc<MessageTool>,
    consolidation: Arc<ConsolidationState>,
}

impl AgentLoop {
    /// Create a new agent loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        model: Option<String>,
        max_iterations: Option<usize>,
        request_config: Option<LlmRequestConfig>,
        restrict_to_workspace: bool,
        session_manager: Option<SessionManager>,
        agent_name: Option<String>,
        memory_window: Option<usize>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let max_iterations = max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let request_config = request_config.unwrap_or_default();
        let memory_window = memory_window.unwrap_or(DEFAULT_MEMORY_WINDOW);
        let agent_name = agent_name.unwrap_or_else(|| "Agent".into());
        let sessions = Arc::new(
            session_manager.unwrap_or_else(|| SessionManager::new(None).expect("failed to create session manager")),
        );
        let memory = Arc::new(MemoryStore::new(&workspace).expect("failed to create memory store"));

        let context = ContextBuilder::new(workspace.clone(), agent_name);

        let mut tools = ToolRegistry::new();
        let allowed_dir = if restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));

        let bus_for_tool = bus.clone();
        let send_callback: crate::tools::message::SendCallback = Arc::new(move |msg: OutboundMessage| {
            let bus = bus_for_tool.clone();
            Box::pin(async move {
                bus.publish_outbound(msg)
                    .map_err(|e| anyhow::anyhow!("failed to publish outbound message: {e}"))
            })
        });
        let message_tool = Arc::new(MessageTool::new(Some(send_callback)));
        tools.register(message_tool.clone());

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = max_iterations,
            memory_window = memory_window,
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            model,
            max_iterations,
            request_config,
            memory_window,
            tools,
            context,
            memory,
            sessions,
            message_tool,
            consolidation: Arc::new(ConsolidationState::new()),
        }
    }

    // ────────────── Outer loop ──────────────

    /// Run the event loop: poll inbound messages (1s timeout so the loop
    /// can notice shutdown even with no traffic) and process them.
    pub async fn run(&self) {
        info!("agent loop started, polling for messages");
        loop {
            match self.bus.consume_inbound_timeout(Duration::from_secs(1)).await {
                ConsumeResult::Message(msg) => {
                    let channel = msg.channel.clone();
                    let chat_id = msg.chat_id.clone();

                    match self.process_message(&msg).await {
                        Ok(Some(response)) => {
                            if let Err(e) = self.bus.publish_outbound(response) {
                                error!(error = %e, "failed to publish outbound message");
                            }
                        }
                        Ok(None) => {
                            // Interactive CLI adapters block on a reply; give them
                            // an empty one rather than leave them hanging.
                            if channel == "cli" {
                                let mut empty = OutboundMessage::new(&channel, &chat_id, "");
                                empty.metadata = msg.metadata.clone();
                                if let Err(e) = self.bus.publish_outbound(empty) {
                                    error!(error = %e, "failed to publish empty cli outbound message");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, channel = %channel, chat_id = %chat_id, "message processing failed");
                            let apology = OutboundMessage::new(
                                &channel,
                                &chat_id,
                                format!("Sorry, I encountered an error: {e}"),
                            );
                            let _ = self.bus.publish_outbound(apology);
                        }
                    }
                }
                ConsumeResult::Timeout => continue,
                ConsumeResult::Closed => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    // ────────────── Per-message processing ──────────────

    /// Process a single inbound message.
    ///
    /// Returns `Ok(None)` when the turn's content was already delivered by
    /// the `message` tool firing mid-turn, so the caller must not also
    /// deliver the loop's own final answer.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<Option<OutboundMessage>> {
        let session_key = msg.session_key();
        let command = msg.content.trim().to_lowercase();

        if command == "/new" {
            return self.handle_new_command(&session_key, msg).await.map(Some);
        }
        if command == "/help" {
            return Ok(Some(OutboundMessage::new(&msg.channel, &msg.chat_id, HELP_TEXT)));
        }

        let mut session = self.sessions.get_or_create(&session_key);
        self.maybe_trigger_background_consolidation(&session);

        self.message_tool.reset_sent_in_turn();
        self.message_tool.set_context(&msg.channel, &msg.chat_id).await;

        let history = self.sessions.get_history(&session_key, self.memory_window);
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();
        let initial = self
            .context
            .build_messages(&history, &msg.content, &media_paths, &msg.channel, &msg.chat_id);
        let skip = 1 + history.len();

        let (final_content, _tools_used, all_msgs) =
            self.run_agent_loop(initial, &msg.channel, &msg.chat_id).await;

        save_turn(&mut session, &all_msgs, skip);
        self.sessions.save(&session)?;

        if self.message_tool.sent_in_turn() {
            return Ok(None);
        }

        let mut outbound = OutboundMessage::new(&msg.channel, &msg.chat_id, &final_content);
        outbound.metadata = msg.metadata.clone();
        Ok(Some(outbound))
    }

    async fn handle_new_command(&self, session_key: &str, msg: &InboundMessage) -> Result<OutboundMessage> {
        let mut session = self.sessions.get_or_create(session_key);
        let ok = consolidation::consolidate(
            &mut session,
            &self.memory,
            self.provider.as_ref(),
            &self.model,
            true,
            self.memory_window,
        )
        .await;

        if !ok {
            return Ok(OutboundMessage::new(
                &msg.channel,
                &msg.chat_id,
                "Memory archival failed, session not cleared. Please try again.",
            ));
        }

        session.clear();
        self.sessions.save(&session)?;
        self.sessions.invalidate(session_key);

        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, "New session started."))
    }

    /// Trigger background consolidation if the unconsolidated tail has grown
    /// past `memory_window`, and nothing is already running for this key.
    fn maybe_trigger_background_consolidation(&self, session: &Session) {
        let unconsolidated = session.messages.len().saturating_sub(session.last_consolidated);
        if unconsolidated < self.memory_window {
            return;
        }

        let key = session.key.clone();
        if !self.consolidation.try_mark_in_flight(&key) {
            return;
        }

        let provider = self.provider.clone();
        let memory = self.memory.clone();
        let sessions = self.sessions.clone();
        let model = self.model.clone();
        let memory_window = self.memory_window;
        let state = self.consolidation.clone();

        tokio::spawn(async move {
            let lock = state.acquire(&key);
            let _guard = lock.lock().await;

            let mut session = sessions.get_or_create(&key);
            let ok = consolidation::consolidate(&mut session, &memory, provider.as_ref(), &model, false, memory_window).await;
            if ok {
                if let Err(e) = sessions.save(&session) {
                    warn!(session_key = %key, error = %e, "failed to persist session after background consolidation");
                } else {
                    sessions.invalidate(&key);
                }
            } else {
                warn!(session_key = %key, "background consolidation made no progress");
            }

            state.release(&key);
            state.clear_in_flight(&key);
        });
    }

    // ────────────── Inner LLM ↔ tool loop ──────────────

    /// The reason-act loop: call the LLM, execute any tool calls it
    /// requests, feed results back, repeat until a final answer or the
    /// iteration cap is hit.
    async fn run_agent_loop(
        &self,
        mut messages: Vec<Message>,
        channel: &str,
        chat_id: &str,
    ) -> (String, Vec<String>, Vec<Message>) {
        let tool_defs = self.tools.get_definitions();
        let mut tools_used = Vec::new();
        let mut final_content: Option<String> = None;

        let mut iteration = 0;
        while iteration < self.max_iterations {
            iteration += 1;
            debug!(iteration = iteration, "LLM call");

            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if response.has_tool_calls() {
                if let Some(clean) = strip_think(response.content.as_deref()) {
                    self.publish_progress(channel, chat_id, &clean, false);
                }
                self.publish_progress(channel, chat_id, &tool_hint(&response.tool_calls), true);

                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    response.tool_calls.clone(),
                    response.reasoning_content.clone(),
                );

                for tc in &response.tool_calls {
                    tools_used.push(tc.function.name.clone());

                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(tool = %tc.function.name, iteration = iteration, "executing tool call");
                    let result = self.tools.execute(&tc.function.name, params).await;
                    debug!(tool = %tc.function.name, result_len = result.len(), "tool result");

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &tc.function.name, &result);
                }
            } else {
                final_content = strip_think(response.content.as_deref());
                break;
            }
        }

        let content = final_content.unwrap_or_else(|| {
            format!(
                "I reached the maximum number of tool call iterations ({}) without completing the task. \
                 You can try breaking the task into smaller steps.",
                self.max_iterations
            )
        });

        (content, tools_used, messages)
    }

    fn publish_progress(&self, channel: &str, chat_id: &str, content: &str, tool_hint: bool) {
        if content.is_empty() {
            return;
        }
        let mut msg = OutboundMessage::new(channel, chat_id, content);
        let key = if tool_hint { "_tool_hint" } else { "_progress" };
        msg.metadata.insert(key.to_string(), serde_json::json!(true));
        if let Err(e) = self.bus.publish_outbound(msg) {
            warn!(error = %e, "failed to publish progress message");
        }
    }

    // ────────────── CLI direct mode ──────────────

    /// Wrap text into an `InboundMessage` on the "cli" channel and process it
    /// synchronously, returning the final content directly (used by the REPL).
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        match self.process_message(&msg).await? {
            Some(response) => Ok(response.content),
            None => Ok(String::new()),
        }
    }

    /// Get a reference to the tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────
// Turn persistence
// ─────────────────────────────────────────────

/// Append `all_msgs[skip:]` to `session.messages`, stripping fields that are
/// only meaningful in-flight (reasoning content), truncating oversized tool
/// results, stamping timestamps, and recording which tools each assistant
/// turn invoked.
fn save_turn(session: &mut Session, all_msgs: &[Message], skip: usize) {
    let now = Utc::now();

    for original in all_msgs.iter().skip(skip) {
        let mut msg = original.clone();
        msg.drop_reasoning();

        if let Message::Tool { content, .. } = &mut msg {
            if content.chars().count() > 500 {
                let truncated: String = content.chars().take(500).collect();
                *content = format!("{truncated}\n... (truncated)");
            }
        }

        if msg.timestamp().is_none() {
            msg.set_timestamp(now);
        }

        let tool_names = match &msg {
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } => Some(calls.iter().map(|c| c.function.name.clone()).collect::<Vec<_>>()),
            _ => None,
        };
        if let Some(names) = tool_names {
            msg.set_tools_used(names);
        }

        session.messages.push(msg);
    }

    session.updated_at = now;
}

// ─────────────────────────────────────────────
// Inner-loop helpers
// ─────────────────────────────────────────────

/// Strip `<thinking>...</thinking>` blocks and trim. Returns `None` if
/// nothing is left (so callers can skip publishing an empty progress update).
fn strip_think(content: Option<&str>) -> Option<String> {
    let content = content?;
    let stripped = think_regex().replace_all(content, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thinking>.*?</thinking>").unwrap())
}

/// Render a short human-readable narration of a batch of tool calls, e.g.
/// `read_file("notes.md"), list_dir`.
fn tool_hint(calls: &[ToolCall]) -> String {
    calls
        .iter()
        .map(|c| match first_string_arg(&c.function.arguments) {
            Some(arg) => format!("{}(\"{}\")", c.function.name, truncate_chars(&arg, 40)),
            None => c.function.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// First string-valued property found in a tool call's JSON arguments object.
/// `serde_json`'s default map has no declaration-order guarantee, so this is
/// "a" string argument rather than strictly the first one as written.
fn first_string_arg(args_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(args_json).ok()?;
    value
        .as_object()?
        .values()
        .find_map(|v| v.as_str().map(|s| s.to_string()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
