//! BuildKit engine driven through the `buildctl` client
//!
//! Every solve is exported as a docker image and piped straight into
//! `docker load`; containers and file reads then go through the Docker API.

use super::docker::{self, DockerContainer};
use super::{
    BuildEngine, BuildKitAddr, Container, ContainerOptions, Definition, SolveRequest, SolveStatus,
    SolvedRef,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const IMAGE_REPOSITORY: &str = "deckhand/build";
const STDERR_TAIL: usize = 20;

pub struct BuildctlEngine {
    buildctl: String,
    addr: BuildKitAddr,
    docker: Docker,
}

impl BuildctlEngine {
    pub fn new(buildctl: impl Into<String>, addr: BuildKitAddr) -> Result<Self> {
        Ok(Self {
            buildctl: buildctl.into(),
            addr,
            docker: docker::connect()?,
        })
    }

    pub fn addr(&self) -> &BuildKitAddr {
        &self.addr
    }

    /// Verify that both the BuildKit daemon and Docker answer
    pub async fn check(&self) -> Result<()> {
        if !self.addr.looks_reachable() {
            anyhow::bail!("BuildKit socket not found at {}", self.addr);
        }

        let output = Command::new(&self.buildctl)
            .arg("--addr")
            .arg(self.addr.to_string())
            .args(["debug", "workers"])
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.buildctl))?;
        if !output.status.success() {
            anyhow::bail!(
                "buildctl could not reach BuildKit at {}: {}",
                self.addr,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let api = docker::check_docker(&self.docker).await?;
        info!("BuildKit at {} and Docker API {} are reachable", self.addr, api);
        Ok(())
    }

    fn build_command(&self, request: &SolveRequest, tag: &str) -> Command {
        let mut cmd = Command::new(&self.buildctl);
        cmd.arg("--addr")
            .arg(self.addr.to_string())
            .arg("build")
            .args(["--progress", "rawjson"]);

        for (name, path) in &request.local_mounts {
            cmd.arg("--local")
                .arg(format!("{}={}", name, path.display()));
        }

        if let Definition::Frontend(frontend) = &request.definition {
            cmd.arg("--frontend").arg(frontend);
        }

        cmd.arg("--output")
            .arg(format!("type=docker,name={}", tag));
        cmd
    }
}

#[async_trait]
impl BuildEngine for BuildctlEngine {
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolvedRef> {
        let tag = format!("{}:{}", IMAGE_REPOSITORY, Uuid::new_v4());
        debug!("Solving into {}", tag);

        let llb = match &request.definition {
            Definition::Llb(bytes) => Some(bytes.clone()),
            Definition::Frontend(_) => None,
        };

        let mut build = self.build_command(&request, &tag);
        build
            .stdin(if llb.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut build = build
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.buildctl))?;

        let mut load = Command::new("docker")
            .arg("load")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn docker load")?;

        let stdin_task = match (llb, build.stdin.take()) {
            (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await
            })),
            _ => None,
        };

        let mut image_out = build.stdout.take().context("buildctl stdout not captured")?;
        let mut image_in = load.stdin.take().context("docker load stdin not captured")?;
        let copy_task = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut image_out, &mut image_in).await;
            drop(image_in);
            copied
        });

        let stderr = build.stderr.take().context("buildctl stderr not captured")?;
        let tail = forward_status(stderr, status).await;

        let build_status = build.wait().await.context("Failed to wait for buildctl")?;
        if let Some(task) = stdin_task {
            if let Err(e) = task.await.context("LLB writer panicked")? {
                warn!("Failed to write LLB to buildctl: {}", e);
            }
        }
        let copied = copy_task.await.context("image copy panicked")?;
        let load_output = load
            .wait_with_output()
            .await
            .context("Failed to wait for docker load")?;

        if !build_status.success() {
            let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
            anyhow::bail!("buildctl build failed ({}): {}", build_status, detail);
        }
        let bytes = copied.context("Failed to stream image into docker load")?;
        if !load_output.status.success() {
            anyhow::bail!(
                "docker load failed: {}",
                String::from_utf8_lossy(&load_output.stderr).trim()
            );
        }

        info!("Loaded {} ({} bytes)", tag, bytes);
        Ok(SolvedRef::new(tag))
    }

    async fn read_file(&self, solved: &SolvedRef, path: &str) -> Result<Vec<u8>> {
        docker::read_image_file(&self.docker, solved.id(), path).await
    }

    async fn new_container(
        &self,
        solved: &SolvedRef,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>> {
        Ok(Box::new(DockerContainer::new(
            self.docker.clone(),
            solved.id(),
            options,
        )))
    }

    async fn discard(&self, solved: &SolvedRef) -> Result<()> {
        docker::remove_image(&self.docker, solved.id()).await
    }
}

/// Decode `--progress rawjson` lines into status events
///
/// Lines that are not status JSON are kept as the error tail. Consumes the
/// sender, so the progress stream ends when buildctl closes stderr.
async fn forward_status(
    stderr: ChildStderr,
    status: mpsc::Sender<SolveStatus>,
) -> VecDeque<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read buildctl output: {}", e);
                break;
            }
        };

        match parse_status_line(&line) {
            Some(event) => {
                if status.send(event).await.is_err() {
                    debug!("Status receiver dropped, discarding progress");
                }
            }
            None if line.trim().is_empty() => {}
            None => {
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }

    tail
}

fn parse_status_line(line: &str) -> Option<SolveStatus> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<SolveStatus>(trimmed).ok()
}
