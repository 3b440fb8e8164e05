//! Async message bus — connects channel adapters to the agent loop.
//!
//! Two unbounded FIFO queues (inbound, outbound). Channels publish to
//! `inbound`; the agent loop consumes it, processes, and publishes to
//! `outbound`, from which channel adapters deliver back to the user.
//! Unbounded because a slow consumer must never block a channel adapter
//! from accepting new input — back-pressure is not part of this design.

use super::types::{InboundMessage, OutboundMessage};
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of a timed consume: either a message arrived, the timeout
/// elapsed with nothing to report, or every sender was dropped and the
/// bus is closed.
#[derive(Debug)]
pub enum ConsumeResult<T> {
    Message(T),
    Timeout,
    Closed,
}

/// The message bus connecting channels ↔ agent loop.
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a new unbounded message bus.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    /// Publish a message from a channel to the agent (inbound).
    pub fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg)
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns `None` if all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next inbound message, bounded by `timeout`.
    ///
    /// This is the agent loop's outer-loop checkpoint: a 1-second timeout
    /// lets the loop notice a shutdown request even with no traffic.
    pub async fn consume_inbound_timeout(&self, timeout: Duration) -> ConsumeResult<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => ConsumeResult::Message(msg),
            Ok(None) => ConsumeResult::Closed,
            Err(_) => ConsumeResult::Timeout,
        }
    }

    /// Publish a response from the agent to a channel (outbound).
    pub fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg)
    }

    /// Consume the next outbound message (blocks until available).
    /// Returns `None` if all senders are dropped.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next outbound message, bounded by `timeout`.
    pub async fn consume_outbound_timeout(&self, timeout: Duration) -> ConsumeResult<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => ConsumeResult::Message(msg),
            Ok(None) => ConsumeResult::Closed,
            Err(_) => ConsumeResult::Timeout,
        }
    }

    /// Get a clone of the inbound sender (for channels to use).
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Get a clone of the outbound sender (for the agent loop to use).
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_message_flow() {
        let bus = MessageBus::new();

        let msg = InboundMessage::new("cli", "user_1", "chat_1", "Hello!");
        bus.publish_inbound(msg).unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "cli");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn test_outbound_message_flow() {
        let bus = MessageBus::new();

        let msg = OutboundMessage::new("cli", "channel_42", "Response here");
        bus.publish_outbound(msg).unwrap();

        let received = bus.consume_outbound().await.unwrap();
        assert_eq!(received.channel, "cli");
        assert_eq!(received.content, "Response here");
    }

    #[tokio::test]
    async fn test_message_ordering() {
        let bus = MessageBus::new();

        for i in 1..=3 {
            let msg = InboundMessage::new("cli", "local", "default", format!("msg-{}", i));
            bus.publish_inbound(msg).unwrap();
        }

        let m1 = bus.consume_inbound().await.unwrap();
        let m2 = bus.consume_inbound().await.unwrap();
        let m3 = bus.consume_inbound().await.unwrap();

        assert_eq!(m1.content, "msg-1");
        assert_eq!(m2.content, "msg-2");
        assert_eq!(m3.content, "msg-3");
    }

    #[tokio::test]
    async fn test_sender_clone_works() {
        let bus = MessageBus::new();
        let sender = bus.inbound_sender();

        let msg = InboundMessage::new("cli", "user_x", "channel_y", "From clone");
        sender.send(msg).unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "cli");
        assert_eq!(received.content, "From clone");
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let bus = std::sync::Arc::new(MessageBus::new());

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let h1 = tokio::spawn(async move {
            let msg = InboundMessage::new("cli", "u1", "c1", "from first");
            bus1.publish_inbound(msg).unwrap();
        });

        let h2 = tokio::spawn(async move {
            let msg = InboundMessage::new("cli", "u2", "c2", "from second");
            bus2.publish_inbound(msg).unwrap();
        });

        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();

        let chat_ids: Vec<&str> = vec![r1.chat_id.as_str(), r2.chat_id.as_str()];
        assert!(chat_ids.contains(&"c1"));
        assert!(chat_ids.contains(&"c2"));
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let bus = std::sync::Arc::new(MessageBus::new());

        let inbound = InboundMessage::new("cli", "user_42", "chat_99", "What is 2+2?");
        bus.publish_inbound(inbound).unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "What is 2+2?");

        let response = OutboundMessage::new(
            received.channel.clone(),
            received.chat_id.clone(),
            "The answer is 4.",
        );
        bus.publish_outbound(response).unwrap();

        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.channel, "cli");
        assert_eq!(outbound.chat_id, "chat_99");
        assert_eq!(outbound.content, "The answer is 4.");
    }

    #[tokio::test]
    async fn test_consume_inbound_timeout_elapses() {
        let bus = MessageBus::new();
        let result = bus.consume_inbound_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, ConsumeResult::Timeout));
    }

    #[tokio::test]
    async fn test_consume_inbound_timeout_receives_message() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("cli", "local", "default", "hi"))
            .unwrap();
        let result = bus.consume_inbound_timeout(Duration::from_secs(1)).await;
        match result {
            ConsumeResult::Message(msg) => assert_eq!(msg.content, "hi"),
            _ => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn test_consume_inbound_closed() {
        let bus = MessageBus::new();
        drop(bus.inbound_tx.clone());
        // The bus itself still holds a sender clone internally (inbound_tx),
        // so dropping an external clone alone won't close the channel; only
        // dropping every sender does. This test documents the Closed variant
        // via a receiver on a bus whose only sender has been dropped.
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
