use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

/// Pre-check run once per session before any analysis
#[async_trait]
pub trait PeerAuthorizer: Send + Sync {
    async fn authorize(&self, peer: Option<IpAddr>) -> Result<bool>;
}

/// Allows peers by IP address; an empty list allows everyone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    peers: HashSet<IpAddr>,
}

impl AllowList {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new(peers: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list of addresses
    pub fn parse(list: &str) -> Result<Self> {
        let peers = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .with_context(|| format!("Invalid peer address '{}'", s))
            })
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self { peers })
    }

    pub fn is_open(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[async_trait]
impl PeerAuthorizer for AllowList {
    async fn authorize(&self, peer: Option<IpAddr>) -> Result<bool> {
        if self.is_open() {
            return Ok(true);
        }

        let peer = peer.context("peer address unavailable")?;
        let allowed = self.peers.contains(&peer);
        debug!(%peer, allowed, "Checked peer against allow list");
        Ok(allowed)
    }
}
