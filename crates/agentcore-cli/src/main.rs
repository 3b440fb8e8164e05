//! Agent Core CLI — entry point.
//!
//! A minimal REPL binary that wires configuration, provider, tools, and
//! the agent loop together. Not a specified surface in its own right —
//! it exists to exercise the engine end-to-end.

mod helpers;
mod repl;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use agentcore_agent::AgentLoop;
use agentcore_core::bus::queue::MessageBus;
use agentcore_core::config::{load_config, Config};
use agentcore_core::session::SessionManager;
use agentcore_providers::HttpProvider;

/// Agent Core — conversational agent engine.
#[derive(Parser)]
#[command(name = "agentcore", version, about, long_about = None)]
struct Cli {
    /// Single message (non-interactive). Omit for REPL mode.
    #[arg(short, long)]
    message: Option<String>,

    /// Session identifier (format: "channel:id").
    #[arg(short, long, default_value = "cli:default")]
    session: String,

    /// Disable Markdown rendering in output.
    #[arg(long, default_value_t = false)]
    no_markdown: bool,

    /// Enable debug logging.
    #[arg(long, default_value_t = false)]
    logs: bool,

    /// Path to the config JSON file (default `~/.agent-core/config.json`).
    #[arg(long)]
    config: Option<String>,

    /// Override the agent's workspace directory.
    #[arg(long)]
    workspace: Option<String>,

    /// Override the default model identifier.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logs);

    let mut config = load_config(cli.config.as_deref().map(std::path::Path::new));
    if let Some(workspace) = &cli.workspace {
        config.agents.defaults.workspace = workspace.clone();
    }
    if let Some(model) = &cli.model {
        config.agents.defaults.model = model.clone();
    }

    let agent_loop = build_agent_loop(&config)?;

    match cli.message {
        Some(msg) => {
            info!(session = %cli.session, "processing single message");
            let response = agent_loop
                .process_direct(&msg)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response, !cli.no_markdown);
        }
        None => {
            repl::run(agent_loop, &cli.session, !cli.no_markdown).await?;
        }
    }

    Ok(())
}

/// Build an `AgentLoop` from the loaded configuration.
fn build_agent_loop(config: &Config) -> Result<AgentLoop> {
    let defaults = &config.agents.defaults;

    let workspace = helpers::expand_tilde(&defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let provider_config = config
        .providers
        .values()
        .find(|p| p.is_configured())
        .or_else(|| config.providers.values().next())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no LLM provider configured in providers.*"))?;

    let provider = HttpProvider::new(&provider_config);

    let bus = Arc::new(MessageBus::new());
    let session_manager =
        SessionManager::new(None).context("failed to create session manager")?;

    let agent_loop = AgentLoop::new(
        bus,
        Arc::new(provider),
        workspace,
        Some(defaults.model.clone()),
        Some(defaults.max_tool_iterations),
        None, // uses defaults for temperature/max_tokens
        config.tools.restrict_to_workspace,
        Some(session_manager),
        None, // default agent name
        Some(defaults.memory_window),
    );

    Ok(agent_loop)
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("agentcore=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
