//! Core types, message bus, session store, and configuration for AgentCore.

pub mod bus;
pub mod config;
pub mod session;
pub mod types;
pub mod utils;

pub use types::{Message, Session, ToolCall, ToolDefinition};
