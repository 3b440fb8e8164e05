//! CLI channel — the reference `Channel` adapter.
//!
//! Prints outbound messages to stdout. The `cli` binary's REPL drives
//! `AgentLoop::process_direct` directly for the interactive path; this
//! adapter exists so the CLI surface also satisfies the `Channel`
//! contract for callers wiring the agent loop through the bus.

use async_trait::async_trait;

use agentcore_core::bus::types::OutboundMessage;

use crate::base::Channel;

/// Fixed chat identity used for all CLI traffic — there is only one
/// conversation per process.
pub const CLI_SENDER_ID: &str = "local";
pub const CLI_CHAT_ID: &str = "default";

/// `Channel` implementation that prints outbound messages to stdout.
#[derive(Default)]
pub struct CliChannel;

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        println!("{}", msg.content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_channel_name() {
        assert_eq!(CliChannel.name(), "cli");
    }

    #[tokio::test]
    async fn test_cli_channel_send_ok() {
        let ch = CliChannel;
        let msg = OutboundMessage::new("cli", CLI_CHAT_ID, "hello");
        assert!(ch.send(&msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_cli_channel_start_stop() {
        let ch = CliChannel;
        assert!(ch.start().await.is_ok());
        assert!(ch.stop().await.is_ok());
    }
}
