//! Session transport
//!
//! Each TCP connection carries one session as newline-delimited JSON: the
//! client writes `ActRequest` objects, the server answers with
//! `ServerMessage` objects until an error or the terminator.

use crate::protocol::{ActRequest, ProtocolError, ServerMessage};
use crate::session::{Inbound, Orchestrator, Outbox};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

const OUTBOX_CAPACITY: usize = 256;

/// Accept sessions until `shutdown` resolves
///
/// Running sessions are not interrupted by shutdown.
pub async fn serve<F>(listener: TcpListener, orchestrator: Orchestrator, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener.local_addr().context("Failed to read listener address")?;
    info!("Listening for sessions on {}", local);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, orchestrator).await {
                        error!(%peer, "Connection failed: {:#}", e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutting down listener");
                return Ok(());
            }
        }
    }
}

/// Run one session over an accepted connection
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    orchestrator: Orchestrator,
) -> Result<()> {
    debug!(%peer, "Accepted connection");
    let (read, write) = stream.into_split();

    let requests = LinesStream::new(BufReader::new(read).lines()).filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(decode_request(&line)),
        Err(e) => Some(Err(anyhow::Error::new(e).context("read request"))),
    });

    let (outbox, replies) = Outbox::channel(OUTBOX_CAPACITY);
    let writer = tokio::spawn(write_replies(write, replies));

    let outcome = orchestrator
        .run(Some(peer.ip()), Inbound::spawn(requests), outbox)
        .await;

    writer.await.context("reply writer panicked")??;

    if let Err(e) = outcome {
        debug!(%peer, "Session ended with error: {}", e);
    }
    Ok(())
}

fn decode_request(line: &str) -> Result<ActRequest> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()).into())
}

async fn write_replies(
    write: OwnedWriteHalf,
    mut replies: mpsc::Receiver<ServerMessage>,
) -> Result<()> {
    let mut writer = BufWriter::new(write);

    while let Some(reply) = replies.recv().await {
        let mut line = serde_json::to_vec(&reply).context("Failed to encode reply")?;
        line.push(b'\n');
        writer.write_all(&line).await.context("Failed to write reply")?;
        writer.flush().await.context("Failed to flush reply")?;

        if reply.is_terminal() {
            break;
        }
    }

    writer.shutdown().await.context("Failed to close connection")?;
    Ok(())
}
