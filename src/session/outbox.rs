use crate::protocol::{ServerMessage, SOURCE_SERVER};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("session stream closed")]
pub struct SendError;

/// Outbound half of a session
///
/// Cloned into every component that talks to the client. Messages are
/// delivered in the order they are sent; the transport drains the receiver.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }

    /// Create an outbox together with the receiver a transport drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        self.tx.send(message).await.map_err(|_| SendError)
    }

    pub async fn send_log(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), SendError> {
        self.send(ServerMessage::log(source, text)).await
    }

    /// Informational log tagged with the server's own source
    pub async fn notice(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send_log(SOURCE_SERVER, text).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (outbox, mut rx) = Outbox::channel(8);
        outbox.notice("first").await.unwrap();
        outbox.send_log("app", "second").await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::log(SOURCE_SERVER, "first"))
        );
        assert_eq!(rx.recv().await, Some(ServerMessage::log("app", "second")));
    }

    #[tokio::test]
    async fn test_send_fails_once_receiver_is_gone() {
        let (outbox, rx) = Outbox::channel(1);
        drop(rx);
        assert!(outbox.is_closed());
        assert!(outbox.notice("lost").await.is_err());
    }
}
