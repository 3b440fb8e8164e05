//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentsConfig` → `AgentDefaults`, plus a single
//! named `ProviderConfig` per configured backend and a `ToolsConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.agent-core/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: HashMap<String, ProviderConfig>,
    pub tools: ToolsConfig,
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

/// Agent configuration container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Default workspace directory.
    pub workspace: String,
    /// Default LLM model identifier.
    pub model: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum tool-calling loop iterations before forcing a response.
    pub max_tool_iterations: usize,
    /// Size of the message window consulted per turn and used to decide
    /// when background consolidation triggers.
    pub memory_window: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.agentcore/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            memory_window: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Human-readable provider name (e.g. `"anthropic"`), used for logging.
    pub name: String,
    /// Base URL of the OpenAI-compatible chat-completions API.
    pub base_url: String,
    /// Name of the environment variable holding the API key (not the key itself).
    pub api_key_env: String,
    /// Default model identifier to use when none is specified.
    pub default_model: String,
}

impl ProviderConfig {
    /// Read the actual API key from the environment variable this config names.
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok()
    }

    /// Whether this provider has a resolvable API key in the environment.
    pub fn is_configured(&self) -> bool {
        self.api_key().is_some_and(|k| !k.is_empty())
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Tool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Timeout in seconds applied to tools that wrap subprocesses. Not
    /// exercised by the current filesystem/message tool set, carried for
    /// future tools that shell out.
    pub exec_timeout_secs: u64,
    /// Whether to restrict file operations to the workspace directory.
    pub restrict_to_workspace: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 60,
            restrict_to_workspace: false,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
