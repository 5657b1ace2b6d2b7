//! In-memory build engine and session plumbing for integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deckhand::buildkit::{
    BuildEngine, Container, ContainerOptions, Process, Signal, SolveRequest, SolveStatus,
    SolvedRef, StartRequest, Vertex,
};
use deckhand::protocol::{ActRequest, ServerMessage, SOURCE_APP};
use deckhand::session::{Inbound, Outbox, Received};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// How the fake app process ends
#[derive(Debug, Clone, Copy)]
pub enum Exit {
    /// Exits as soon as it was started
    Clean,
    /// Exits with a failure as soon as it was started
    Failed,
    /// Keeps running until it receives this signal
    OnSignal(Signal),
    /// Ignores every signal
    Never,
}

/// What the app was started with
#[derive(Debug, Clone)]
pub struct Started {
    pub args: Vec<String>,
    pub cwd: String,
    pub env: Vec<String>,
}

pub struct FakeProcess {
    exit: Exit,
    signals: Mutex<Vec<Signal>>,
    exited: Notify,
}

impl FakeProcess {
    fn new(exit: Exit) -> Self {
        Self {
            exit,
            signals: Mutex::new(Vec::new()),
            exited: Notify::new(),
        }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Process for FakeProcess {
    async fn signal(&self, signal: Signal) -> Result<()> {
        self.signals.lock().unwrap().push(signal);
        if matches!(self.exit, Exit::OnSignal(s) if s == signal) {
            self.exited.notify_one();
        }
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        match self.exit {
            Exit::Clean => Ok(()),
            Exit::Failed => Err(anyhow!("process exited with status 1")),
            Exit::OnSignal(signal) => {
                self.exited.notified().await;
                Err(anyhow!("process terminated by {}", signal))
            }
            Exit::Never => std::future::pending().await,
        }
    }
}

struct FakeContainer {
    process: Arc<FakeProcess>,
    output: Vec<String>,
    app: Option<SocketAddr>,
    started: Arc<Mutex<Vec<Started>>>,
    released: Arc<Mutex<u32>>,
}

#[async_trait]
impl Container for FakeContainer {
    async fn start(&self, request: StartRequest) -> Result<Arc<dyn Process>> {
        self.started.lock().unwrap().push(Started {
            args: request.args,
            cwd: request.cwd,
            env: request.env,
        });

        let mut sink = request.output;
        for chunk in &self.output {
            sink.write(chunk.as_bytes()).await?;
        }
        sink.flush().await?;

        Ok(self.process.clone())
    }

    async fn endpoint(&self, _port: u16) -> Result<SocketAddr> {
        self.app.ok_or_else(|| anyhow!("container has no network address"))
    }

    async fn release(&self) -> Result<()> {
        *self.released.lock().unwrap() += 1;
        Ok(())
    }
}

/// Build engine double recording what the session asked of it
pub struct FakeEngine {
    progress: Vec<SolveStatus>,
    inferred: Option<Vec<u8>>,
    fail_solve: bool,
    output: Vec<String>,
    app: Option<SocketAddr>,
    process: Arc<FakeProcess>,
    solves: Mutex<Vec<SolveRequest>>,
    containers: Mutex<Vec<ContainerOptions>>,
    reads: Mutex<Vec<String>>,
    discards: Mutex<Vec<String>>,
    started: Arc<Mutex<Vec<Started>>>,
    released: Arc<Mutex<u32>>,
}

impl FakeEngine {
    pub fn new(exit: Exit) -> Self {
        Self {
            progress: Vec::new(),
            inferred: None,
            fail_solve: false,
            output: Vec::new(),
            app: None,
            process: Arc::new(FakeProcess::new(exit)),
            solves: Mutex::new(Vec::new()),
            containers: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            discards: Mutex::new(Vec::new()),
            started: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(0)),
        }
    }

    /// Progress events replayed on every solve
    pub fn with_progress(mut self, progress: Vec<SolveStatus>) -> Self {
        self.progress = progress;
        self
    }

    /// Content served for any file read out of a solved result
    pub fn with_inferred(mut self, content: &str) -> Self {
        self.inferred = Some(content.as_bytes().to_vec());
        self
    }

    /// Raw chunks the app writes to its output
    pub fn with_output(mut self, chunks: &[&str]) -> Self {
        self.output = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Address the app of every container is reachable on
    pub fn with_app(mut self, addr: SocketAddr) -> Self {
        self.app = Some(addr);
        self
    }

    pub fn failing_solve(mut self) -> Self {
        self.fail_solve = true;
        self
    }

    pub fn solves(&self) -> Vec<SolveRequest> {
        self.solves.lock().unwrap().clone()
    }

    pub fn containers(&self) -> Vec<ContainerOptions> {
        self.containers.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    /// Ids of solved results dropped so far
    pub fn discards(&self) -> Vec<String> {
        self.discards.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<Started> {
        self.started.lock().unwrap().clone()
    }

    pub fn released(&self) -> u32 {
        *self.released.lock().unwrap()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.process.signals()
    }
}

#[async_trait]
impl BuildEngine for FakeEngine {
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolvedRef> {
        let n = {
            let mut solves = self.solves.lock().unwrap();
            solves.push(request);
            solves.len()
        };

        for event in &self.progress {
            status.send(event.clone()).await?;
        }

        if self.fail_solve {
            return Err(anyhow!("executor failed running [pip install]"));
        }
        Ok(SolvedRef::new(format!("deckhand/test:{}", n)))
    }

    async fn read_file(&self, _solved: &SolvedRef, path: &str) -> Result<Vec<u8>> {
        self.reads.lock().unwrap().push(path.to_string());
        self.inferred
            .clone()
            .ok_or_else(|| anyhow!("{}: no such file", path))
    }

    async fn new_container(
        &self,
        _solved: &SolvedRef,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>> {
        self.containers.lock().unwrap().push(options);
        Ok(Box::new(FakeContainer {
            process: self.process.clone(),
            output: self.output.clone(),
            app: self.app,
            started: self.started.clone(),
            released: self.released.clone(),
        }))
    }

    async fn discard(&self, solved: &SolvedRef) -> Result<()> {
        self.discards.lock().unwrap().push(solved.id().to_string());
        Ok(())
    }
}

/// Client side of an in-process session
pub struct Client {
    requests: mpsc::Sender<Received>,
    replies: mpsc::Receiver<ServerMessage>,
}

impl Client {
    /// Queue requests before the session reads them
    pub async fn send(&self, request: ActRequest) {
        self.requests.send(Ok(request)).await.unwrap();
    }

    /// Everything the server sent so far
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.replies.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Wire up a session's queues
pub fn session() -> (Client, Inbound, Outbox) {
    let (requests, rx) = mpsc::channel(16);
    let (outbox, replies) = Outbox::channel(1024);
    (
        Client { requests, replies },
        Inbound::from_channel(rx),
        outbox,
    )
}

pub fn app_logs(messages: &[ServerMessage]) -> Vec<String> {
    logs_from(messages, SOURCE_APP)
}

pub fn logs_from(messages: &[ServerMessage], source: &str) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Log(line) if line.source == source => Some(line.text.clone()),
            _ => None,
        })
        .collect()
}

/// One finished build step as BuildKit reports it
pub fn cached_step(digest: &str, name: &str) -> SolveStatus {
    SolveStatus {
        vertexes: vec![Vertex {
            digest: digest.to_string(),
            name: name.to_string(),
            cached: true,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn fixture_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

pub fn path_of(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().to_path_buf()
}
