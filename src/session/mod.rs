//! Session Orchestrator
//!
//! One session is one push: authorize, read the opening message, analyze
//! the tree, build, run, report. Phases run strictly one after another and
//! every failure ends the session with exactly one error message.

pub mod inbound;
pub mod outbox;

pub use inbound::{Inbound, Received};
pub use outbox::{Outbox, SendError};

use crate::analysis::SourceAnalyzer;
use crate::auth::PeerAuthorizer;
use crate::buildkit::{
    solve_with_progress, BuildEngine, ContainerOptions, SolveRequest, SolvedRef, StartRequest,
    DOCKERFILE_FRONTEND,
};
use crate::error::SessionError;
use crate::llb;
use crate::plan::{python_plan, CONTEXT_NAME};
use crate::protocol::{AnalysisResult, ClientRequest, ServerMessage, SOURCE_APP};
use crate::proxy::{AppProxy, ProxyConfig};
use crate::runner::{app_command, run_in_container, LogSink, APP_CWD};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Hostname of containers running a generated Python image
pub const APP_HOSTNAME: &str = "app";

/// What to solve and how to start the result
struct BuildTarget {
    request: SolveRequest,
    options: ContainerOptions,
    env: Vec<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    src_dir: PathBuf,
    engine: Arc<dyn BuildEngine>,
    auth: Arc<dyn PeerAuthorizer>,
    proxy: Option<ProxyConfig>,
}

impl Orchestrator {
    pub fn new(
        src_dir: impl Into<PathBuf>,
        engine: Arc<dyn BuildEngine>,
        auth: Arc<dyn PeerAuthorizer>,
    ) -> Self {
        Self {
            src_dir: src_dir.into(),
            engine,
            auth,
            proxy: None,
        }
    }

    /// Forward `listen` to `app_port` of the running app for each session
    pub fn with_proxy(mut self, listen: SocketAddr, app_port: u16) -> Self {
        self.proxy = Some(ProxyConfig { listen, app_port });
        self
    }

    /// Drive one session and report its outcome to the client
    ///
    /// Sends the terminator on success, or one error message on failure.
    /// Internal failures reach the client only as a generic message.
    pub async fn run(
        &self,
        peer: Option<IpAddr>,
        mut inbound: Inbound,
        outbox: Outbox,
    ) -> Result<(), SessionError> {
        let span = info_span!("session", id = %Uuid::new_v4(), peer = ?peer);

        async move {
            info!("Session started");
            let proxy = match self.proxy {
                Some(config) => match AppProxy::listen(config).await {
                    Ok(proxy) => Some(proxy),
                    Err(e) => {
                        warn!("proxy listen: {:#}", e);
                        None
                    }
                },
                None => None,
            };

            let outcome = self
                .drive(peer, &mut inbound, &outbox, proxy.as_ref())
                .await;

            let last = match &outcome {
                Ok(()) => {
                    info!("Session finished");
                    ServerMessage::Done {}
                }
                Err(e) if e.is_user() => {
                    info!("Session ended: {}", e);
                    ServerMessage::Error(e.client_message())
                }
                Err(e) => {
                    error!(error = ?e, "Session failed");
                    ServerMessage::Error(e.client_message())
                }
            };
            if let Err(e) = outbox.send(last).await {
                warn!("send final message: {}", e);
            }

            if let Some(proxy) = proxy {
                if let Err(e) = proxy.shutdown().await {
                    warn!("proxy shutdown: {:#}", e);
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        peer: Option<IpAddr>,
        inbound: &mut Inbound,
        outbox: &Outbox,
        proxy: Option<&AppProxy>,
    ) -> Result<(), SessionError> {
        let authorized = self
            .auth
            .authorize(peer)
            .await
            .map_err(|e| SessionError::internal("check peer auth", e))?;
        if !authorized {
            return Err(SessionError::user("Not authorized"));
        }

        match inbound.next().await? {
            ClientRequest::Empty => {}
            ClientRequest::Cancel => return Err(SessionError::user("analysis canceled")),
            ClientRequest::Choice(_) => return Err(SessionError::user("premature choice")),
        }

        let analyzer = SourceAnalyzer::new(&self.src_dir, self.engine.as_ref(), outbox);
        let analysis = analyzer.analyze(inbound).await?;

        let target = self.target(&analysis)?;
        let solved = solve_with_progress(self.engine.as_ref(), target.request.clone(), outbox)
            .await
            .map_err(|e| SessionError::internal("build", e))?;

        let ran = self
            .run_solved(&solved, target, inbound, outbox, proxy)
            .await;
        if let Err(e) = self.engine.discard(&solved).await {
            warn!("image Release: {:#}", e);
        }
        ran?;

        outbox
            .send(ServerMessage::AnalysisResult(analysis))
            .await
            .map_err(|e| SessionError::internal("stream send", e))
    }

    async fn run_solved(
        &self,
        solved: &SolvedRef,
        target: BuildTarget,
        inbound: &mut Inbound,
        outbox: &Outbox,
        proxy: Option<&AppProxy>,
    ) -> Result<(), SessionError> {
        let container = self
            .engine
            .new_container(solved, target.options)
            .await
            .map_err(|e| SessionError::internal("new container", e))?;

        let start = StartRequest {
            args: app_command(),
            cwd: APP_CWD.to_string(),
            env: target.env,
            output: LogSink::new(SOURCE_APP, outbox.clone()),
        };
        let ran = run_in_container(container.as_ref(), start, inbound, proxy).await;

        if let Err(e) = container.release().await {
            warn!("ctr Release: {:#}", e);
        }
        ran
    }

    fn target(&self, analysis: &AnalysisResult) -> Result<BuildTarget, SessionError> {
        if analysis.use_dockerfile {
            return Ok(BuildTarget {
                request: SolveRequest::frontend(DOCKERFILE_FRONTEND)
                    .with_local("dockerfile", &self.src_dir)
                    .with_local(CONTEXT_NAME, &self.src_dir),
                options: ContainerOptions::default(),
                env: Vec::new(),
            });
        }

        let plan = python_plan(analysis);
        let definition = llb::definition(&plan, Some(self.src_dir.as_path()))
            .map_err(|e| SessionError::internal("marshal", e))?;

        let mut env = vec![llb::DEFAULT_PATH.to_string()];
        env.extend(plan.env.iter().cloned());

        Ok(BuildTarget {
            request: SolveRequest::llb(definition).with_local(CONTEXT_NAME, &self.src_dir),
            options: ContainerOptions {
                hostname: Some(APP_HOSTNAME.to_string()),
            },
            env,
        })
    }
}
