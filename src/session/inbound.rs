use crate::error::SessionError;
use crate::protocol::{ActRequest, ClientRequest};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const INBOUND_CAPACITY: usize = 16;

/// Client messages as read by the receive loop
pub type Received = anyhow::Result<ActRequest>;

/// Single-consumer queue of client messages
///
/// Filled by a dedicated receive task for the lifetime of the session. Only
/// one blocking step of the orchestrator reads from it at a time, which the
/// `&mut self` receiver enforces.
pub struct Inbound {
    rx: mpsc::Receiver<Received>,
    pump: Option<JoinHandle<()>>,
}

impl Inbound {
    /// Spawn the receive loop draining `stream` into the queue
    ///
    /// The queue ends when the client closes its send side. A transport error
    /// is forwarded once and stops the loop.
    pub fn spawn<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<ActRequest>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let pump = tokio::spawn(receive_loop(stream, tx));
        Self {
            rx,
            pump: Some(pump),
        }
    }

    /// Queue fed directly by the caller, without a receive task
    pub fn from_channel(rx: mpsc::Receiver<Received>) -> Self {
        Self { rx, pump: None }
    }

    /// Wait for the next client message and resolve its variant
    pub async fn next(&mut self) -> Result<ClientRequest, SessionError> {
        match self.rx.recv().await {
            None => Err(SessionError::msg("stream recv: channel closed")),
            Some(Err(e)) => Err(SessionError::Internal(e.context("stream recv"))),
            Some(Ok(req)) => req
                .classify()
                .map_err(|e| SessionError::internal("stream recv", e)),
        }
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn receive_loop<S>(mut stream: S, tx: mpsc::Sender<Received>)
where
    S: Stream<Item = anyhow::Result<ActRequest>> + Send + Unpin,
{
    while let Some(item) = stream.next().await {
        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            debug!("Session consumer gone, stopping receive loop");
            return;
        }
        if failed {
            return;
        }
    }

    debug!("Client closed its send side");
}
