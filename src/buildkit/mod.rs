//! Build engine contract
//!
//! The orchestrator talks to BuildKit (or anything behaving like it) through
//! [`BuildEngine`]: solve a definition into an artifact, read files out of
//! it, and run containers on top of it.

pub mod buildctl;
pub mod connection;
pub mod docker;
pub mod progress;
pub mod status;

use crate::runner::LogSink;
use crate::session::Outbox;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::warn;

pub use buildctl::BuildctlEngine;
pub use connection::BuildKitAddr;
pub use progress::StatusTracker;
pub use status::{SolveStatus, Vertex, VertexLog, VertexWarning};

/// Frontend that interprets a Dockerfile from the `dockerfile` local
pub const DOCKERFILE_FRONTEND: &str = "dockerfile.v0";

/// What the engine is asked to solve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    /// Let a named frontend build the plan (e.g. the Dockerfile frontend)
    Frontend(String),
    /// Serialized LLB definition
    Llb(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    pub definition: Definition,
    /// Named local directories exposed to the build (`context`, `dockerfile`)
    pub local_mounts: BTreeMap<String, PathBuf>,
}

impl SolveRequest {
    pub fn frontend(frontend: impl Into<String>) -> Self {
        Self {
            definition: Definition::Frontend(frontend.into()),
            local_mounts: BTreeMap::new(),
        }
    }

    pub fn llb(definition: Vec<u8>) -> Self {
        Self {
            definition: Definition::Llb(definition),
            local_mounts: BTreeMap::new(),
        }
    }

    pub fn with_local(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.local_mounts.insert(name.into(), path.into());
        self
    }
}

/// Handle to a solved build result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SolvedRef(String);

impl SolvedRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    pub hostname: Option<String>,
}

/// Process to start inside a container
pub struct StartRequest {
    pub args: Vec<String>,
    pub cwd: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    /// Receives both stdout and stderr
    pub output: LogSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Solve a definition, streaming progress into `status` until done
    ///
    /// The sender is dropped when the solve finishes, which ends the
    /// progress stream.
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolvedRef>;

    /// Read one file out of a solved result
    async fn read_file(&self, solved: &SolvedRef, path: &str) -> Result<Vec<u8>>;

    async fn new_container(
        &self,
        solved: &SolvedRef,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>>;

    /// Drop a solved result once nothing refers to it any more
    async fn discard(&self, solved: &SolvedRef) -> Result<()>;
}

#[async_trait]
pub trait Container: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<std::sync::Arc<dyn Process>>;

    /// Address reaching `port` inside the started container
    async fn endpoint(&self, port: u16) -> Result<SocketAddr>;

    async fn release(&self) -> Result<()>;
}

#[async_trait]
pub trait Process: Send + Sync {
    async fn signal(&self, signal: Signal) -> Result<()>;

    /// Resolve once the process has exited; an unclean exit is an error
    async fn wait(&self) -> Result<()>;
}

const STATUS_CAPACITY: usize = 64;

/// Solve while rendering progress to the session
///
/// The tracker is drained before returning, so every progress line is on the
/// wire before whatever the caller sends next.
pub async fn solve_with_progress(
    engine: &dyn BuildEngine,
    request: SolveRequest,
    outbox: &Outbox,
) -> Result<SolvedRef> {
    let (status_tx, status_rx) = mpsc::channel(STATUS_CAPACITY);
    let tracker = StatusTracker::spawn(outbox.clone(), status_rx);

    let solved = engine.solve(request, status_tx).await;

    if let Err(e) = tracker.await {
        warn!("status tracker: {}", e);
    }
    solved
}
