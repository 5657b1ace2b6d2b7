//! Per-session app proxy
//!
//! While a session runs, connections to the proxy address are forwarded to
//! the app inside the run container. Until the app has started there is no
//! target and connections are closed right away.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Where the proxy listens and which app port it forwards to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub app_port: u16,
}

pub struct AppProxy {
    local: SocketAddr,
    app_port: u16,
    target: watch::Sender<Option<SocketAddr>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AppProxy {
    /// Bind the listener and start accepting
    pub async fn listen(config: ProxyConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("Failed to bind app proxy on {}", config.listen))?;
        let local = listener.local_addr().context("Failed to read proxy address")?;

        let (target, target_rx) = watch::channel(None);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, target_rx, stop_rx));

        debug!("App proxy listening on {}", local);
        Ok(Self {
            local,
            app_port: config.app_port,
            target,
            stop: Some(stop),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn app_port(&self) -> u16 {
        self.app_port
    }

    /// Forward new connections to `target`
    pub fn route_to(&self, target: SocketAddr) {
        info!("App proxy {} -> {}", self.local, target);
        self.target.send_replace(Some(target));
    }

    /// Stop accepting, drop open connections and release the address
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.context("app proxy task failed")?;
        debug!("App proxy on {} closed", self.local);
        Ok(())
    }
}

impl Drop for AppProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    target: watch::Receiver<Option<SocketAddr>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("App proxy accept: {}", e);
                        continue;
                    }
                };
                let upstream = *target.borrow();
                let Some(upstream) = upstream else {
                    debug!(%peer, "App not running yet, closing connection");
                    continue;
                };
                connections.spawn(async move {
                    if let Err(e) = forward(stream, upstream).await {
                        debug!(%peer, "App proxy connection: {:#}", e);
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn forward(mut client: TcpStream, upstream: SocketAddr) -> Result<()> {
    let mut app = TcpStream::connect(upstream)
        .await
        .with_context(|| format!("Failed to connect to app at {}", upstream))?;
    copy_bidirectional(&mut client, &mut app)
        .await
        .context("proxy copy")?;
    Ok(())
}
