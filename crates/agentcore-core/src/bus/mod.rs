//! In-process message bus connecting channel adapters to the agent loop.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
