//! Bus event types — messages flowing between channels and the agent loop.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Attached media (images, documents).
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (e.g. message_id), plus reserved flags.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Explicit session key override. When set, takes precedence over the
    /// canonical `channel:chat_id` derivation.
    pub session_key: Option<String>,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            session_key: None,
        }
    }

    /// Session key combining channel and chat_id (e.g. "cli:default"),
    /// unless an explicit override was set on the message.
    ///
    /// Used as the key for session persistence and history lookup.
    pub fn session_key(&self) -> String {
        self.session_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.channel, self.chat_id))
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
    /// Attached media to send.
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata. Reserved keys: `_progress` (bool) marks
    /// an interim progress update, `_tool_hint` (bool) marks a tool-call
    /// narration update.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// True if this message carries the `_progress` reserved flag.
    pub fn is_progress(&self) -> bool {
        self.metadata
            .get("_progress")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// True if this message carries the `_tool_hint` reserved flag.
    pub fn is_tool_hint(&self) -> bool {
        self.metadata
            .get("_tool_hint")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
