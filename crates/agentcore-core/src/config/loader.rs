//! Config loader — reads `~/.agent-core/config.json`, merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.agent-core/config.json`
//! 3. Environment variables `AGENTCORE_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
///
/// Deliberately `~/.agent-core/`, distinct from the `~/.agentcore/` data
/// directory used for sessions and workspaces.
pub fn get_config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".agent-core").join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `AGENTCORE_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `AGENTCORE_AGENTS__DEFAULTS__MODEL` → `agents.defaults.model`
/// - `AGENTCORE_AGENTS__DEFAULTS__MAX_TOKENS` → `agents.defaults.max_tokens`
/// - `AGENTCORE_AGENTS__DEFAULTS__TEMPERATURE` → `agents.defaults.temperature`
/// - `AGENTCORE_AGENTS__DEFAULTS__MAX_TOOL_ITERATIONS` → `agents.defaults.max_tool_iterations`
/// - `AGENTCORE_AGENTS__DEFAULTS__MEMORY_WINDOW` → `agents.defaults.memory_window`
/// - `AGENTCORE_AGENTS__DEFAULTS__WORKSPACE` → `agents.defaults.workspace`
/// - `AGENTCORE_TOOLS__RESTRICT_TO_WORKSPACE` → `tools.restrict_to_workspace`
/// - `AGENTCORE_TOOLS__EXEC_TIMEOUT_SECS` → `tools.exec_timeout_secs`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__MODEL") {
        config.agents.defaults.model = val;
    }
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__MAX_TOKENS") {
        if let Ok(n) = val.parse::<u32>() {
            config.agents.defaults.max_tokens = n;
        }
    }
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__TEMPERATURE") {
        if let Ok(t) = val.parse::<f64>() {
            config.agents.defaults.temperature = t;
        }
    }
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__MAX_TOOL_ITERATIONS") {
        if let Ok(n) = val.parse::<usize>() {
            config.agents.defaults.max_tool_iterations = n;
        }
    }
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__MEMORY_WINDOW") {
        if let Ok(n) = val.parse::<usize>() {
            config.agents.defaults.memory_window = n;
        }
    }
    if let Ok(val) = std::env::var("AGENTCORE_AGENTS__DEFAULTS__WORKSPACE") {
        config.agents.defaults.workspace = val;
    }

    if let Ok(val) = std::env::var("AGENTCORE_TOOLS__RESTRICT_TO_WORKSPACE") {
        config.tools.restrict_to_workspace = val == "true" || val == "1";
    }
    if let Ok(val) = std::env::var("AGENTCORE_TOOLS__EXEC_TIMEOUT_SECS") {
        if let Ok(n) = val.parse::<u64>() {
            config.tools.exec_timeout_secs = n;
        }
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
