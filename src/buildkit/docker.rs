use super::{Container, ContainerOptions, Process, Signal, StartRequest};
use crate::runner::LogSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::RemoveImageOptions;
use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use futures_util::StreamExt;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connect to the local Docker daemon
pub fn connect() -> Result<Docker> {
    Docker::connect_with_local_defaults().context("Failed to connect to Docker")
}

/// Check that the Docker daemon answers
pub async fn check_docker(docker: &Docker) -> Result<String> {
    let version = docker
        .version()
        .await
        .context("Failed to query Docker version")?;
    Ok(version.api_version.unwrap_or_else(|| "unknown".to_string()))
}

/// Read a single file out of an image
///
/// Creates a container without starting it, downloads `path` as a tar
/// archive and removes the container again.
pub async fn read_image_file(docker: &Docker, image: &str, path: &str) -> Result<Vec<u8>> {
    let config = Config {
        image: Some(image.to_string()),
        cmd: Some(vec!["true".to_string()]),
        ..Default::default()
    };
    let created = docker
        .create_container(None::<CreateContainerOptions<String>>, config)
        .await
        .with_context(|| format!("Failed to create container from {}", image))?;

    let result = download_file(docker, &created.id, path).await;

    if let Err(e) = remove(docker, &created.id).await {
        warn!("ctr Release: {:#}", e);
    }
    result
}

async fn download_file(docker: &Docker, id: &str, path: &str) -> Result<Vec<u8>> {
    let mut stream = docker.download_from_container(
        id,
        Some(DownloadFromContainerOptions {
            path: path.to_string(),
        }),
    );

    let mut archive = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to download {}", path))?;
        archive.extend_from_slice(&chunk);
    }

    let mut tar = tar::Archive::new(archive.as_slice());
    for entry in tar.entries().context("Failed to read archive")? {
        let mut entry = entry.context("Failed to read archive entry")?;
        if entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .with_context(|| format!("Failed to read {} from archive", path))?;
            return Ok(content);
        }
    }

    anyhow::bail!("{} not found in container archive", path)
}

/// Remove a loaded image, untagging it first if containers still use it
pub async fn remove_image(docker: &Docker, image: &str) -> Result<()> {
    let deleted = docker
        .remove_image(
            image,
            Some(RemoveImageOptions {
                force: true,
                ..Default::default()
            }),
            None,
        )
        .await
        .with_context(|| format!("Failed to remove image {}", image))?;
    debug!("Removed image {} ({} layers)", image, deleted.len());
    Ok(())
}

/// First IP address the container got on any of its networks
fn container_ip(inspect: &ContainerInspectResponse) -> Option<IpAddr> {
    let settings = inspect.network_settings.as_ref()?;
    let primary = settings.ip_address.iter();
    let networks = settings
        .networks
        .iter()
        .flat_map(|networks| networks.values())
        .filter_map(|endpoint| endpoint.ip_address.as_ref());

    primary
        .chain(networks)
        .find_map(|ip| ip.parse::<IpAddr>().ok())
}

async fn remove(docker: &Docker, id: &str) -> Result<()> {
    docker
        .remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
        .with_context(|| format!("Failed to remove container {}", id))
}

/// Container backed by a Docker image
///
/// Docker binds the process at creation time, so the container itself is
/// created by [`Container::start`].
pub struct DockerContainer {
    docker: Docker,
    image: String,
    options: ContainerOptions,
    id: StdMutex<Option<String>>,
}

impl DockerContainer {
    pub fn new(docker: Docker, image: impl Into<String>, options: ContainerOptions) -> Self {
        Self {
            docker,
            image: image.into(),
            options,
            id: StdMutex::new(None),
        }
    }

    fn container_id(&self) -> Option<String> {
        self.id.lock().ok().and_then(|id| id.clone())
    }
}

#[async_trait]
impl Container for DockerContainer {
    async fn start(&self, request: StartRequest) -> Result<Arc<dyn Process>> {
        let config = Config {
            image: Some(self.image.clone()),
            hostname: self.options.hostname.clone(),
            cmd: Some(request.args.clone()),
            working_dir: Some(request.cwd.clone()),
            env: Some(request.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .with_context(|| format!("Failed to create container from {}", self.image))?;
        for warning in &created.warnings {
            warn!("Docker: {}", warning);
        }
        if let Ok(mut id) = self.id.lock() {
            *id = Some(created.id.clone());
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to start container {}", created.id))?;
        info!(
            "Started {:?} in container {}",
            request.args,
            &created.id[..12.min(created.id.len())]
        );

        let logs = tokio::spawn(pump_logs(
            self.docker.clone(),
            created.id.clone(),
            request.output,
        ));

        Ok(Arc::new(DockerProcess {
            docker: self.docker.clone(),
            id: created.id,
            logs: Mutex::new(Some(logs)),
        }))
    }

    async fn endpoint(&self, port: u16) -> Result<SocketAddr> {
        let id = self
            .container_id()
            .context("container has not been started")?;
        let inspect = self
            .docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await
            .with_context(|| format!("Failed to inspect container {}", id))?;
        let ip = container_ip(&inspect)
            .with_context(|| format!("container {} has no network address", id))?;
        Ok(SocketAddr::new(ip, port))
    }

    async fn release(&self) -> Result<()> {
        match self.container_id() {
            Some(id) => {
                debug!("Removing container {}", id);
                remove(&self.docker, &id).await
            }
            None => Ok(()),
        }
    }
}

async fn pump_logs(docker: Docker, id: String, mut sink: LogSink) -> Result<()> {
    let mut stream = docker.logs(
        &id,
        Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        }),
    );

    while let Some(output) = stream.next().await {
        let message = match output.context("Failed to read container output")? {
            LogOutput::StdOut { message }
            | LogOutput::StdErr { message }
            | LogOutput::Console { message } => message,
            LogOutput::StdIn { .. } => continue,
        };
        sink.write(&message).await?;
    }

    sink.flush().await?;
    Ok(())
}

pub struct DockerProcess {
    docker: Docker,
    id: String,
    logs: Mutex<Option<JoinHandle<Result<()>>>>,
}

#[async_trait]
impl Process for DockerProcess {
    async fn signal(&self, signal: Signal) -> Result<()> {
        debug!("Sending {} to container {}", signal, self.id);
        self.docker
            .kill_container(
                &self.id,
                Some(KillContainerOptions {
                    signal: signal.as_str(),
                }),
            )
            .await
            .with_context(|| format!("Failed to send {} to container {}", signal, self.id))
    }

    async fn wait(&self) -> Result<()> {
        let mut stream = self
            .docker
            .wait_container(&self.id, None::<WaitContainerOptions<String>>);

        let exit = match stream.next().await {
            Some(Ok(response)) if response.status_code == 0 => Ok(()),
            Some(Ok(response)) => Err(anyhow::anyhow!(
                "process exited with status {}",
                response.status_code
            )),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { error, code })) => Err(
                anyhow::anyhow!("process exited with status {}: {}", code, error),
            ),
            Some(Err(e)) => Err(anyhow::Error::new(e).context("Failed to wait for container")),
            None => Err(anyhow::anyhow!("container wait stream ended without status")),
        };

        let logs = self.logs.lock().await.take();
        if let Some(logs) = logs {
            match logs.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("container log stream: {:#}", e),
                Err(e) => warn!("container log task: {}", e),
            }
        }

        exit
    }
}
