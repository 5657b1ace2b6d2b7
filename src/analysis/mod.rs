//! Source Analyzer
//!
//! Decides how a pushed source tree gets built: a `Dockerfile` wins outright,
//! otherwise the tree is treated as a Python app driven by
//! `requirements.txt`. A missing manifest can be inferred on request.

pub mod requirements;

use crate::buildkit::{solve_with_progress, BuildEngine, SolveRequest};
use crate::error::SessionError;
use crate::llb;
use crate::plan::{self, python::INFERRED_REQUIREMENTS, CONTEXT_NAME};
use crate::protocol::{AnalysisResult, Choice, ClientRequest, ServerMessage};
use crate::session::{Inbound, Outbox};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use requirements::{scan, ManifestHints};

pub const DOCKERFILE: &str = "Dockerfile";
pub const REQUIREMENTS: &str = "requirements.txt";

/// Prompt offered when the tree has no `requirements.txt`
pub fn inference_choice() -> Choice {
    Choice {
        title: "No requirements.txt; try guessing it?".to_string(),
        description: "Guess what dependencies the program has by inspecting the source code."
            .to_string(),
        affirmative: "Yes, guess".to_string(),
        negative: "No, I'll make it".to_string(),
        default_value: true,
    }
}

/// Build decision for a tree without talking to the client
///
/// Returns `None` when the manifest is missing and would need inference.
pub fn analyze_offline(src_dir: &Path) -> anyhow::Result<Option<AnalysisResult>> {
    if src_dir.join(DOCKERFILE).try_exists()? {
        return Ok(Some(AnalysisResult::dockerfile()));
    }

    let manifest = src_dir.join(REQUIREMENTS);
    if !manifest.try_exists()? {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&manifest)?;
    Ok(Some(python_result(scan(&content))))
}

fn python_result(hints: ManifestHints) -> AnalysisResult {
    AnalysisResult {
        use_dockerfile: false,
        use_python_requirements: true,
        needs_git: hints.needs_git,
        needs_lib_gl: hints.needs_lib_gl,
        needs_lib_glib: hints.needs_lib_glib,
    }
}

pub struct SourceAnalyzer<'a> {
    src_dir: PathBuf,
    engine: &'a dyn BuildEngine,
    outbox: &'a Outbox,
}

impl<'a> SourceAnalyzer<'a> {
    pub fn new(
        src_dir: impl Into<PathBuf>,
        engine: &'a dyn BuildEngine,
        outbox: &'a Outbox,
    ) -> Self {
        Self {
            src_dir: src_dir.into(),
            engine,
            outbox,
        }
    }

    pub async fn analyze(&self, inbound: &mut Inbound) -> Result<AnalysisResult, SessionError> {
        if self.exists(DOCKERFILE).await? {
            self.notice("Found Dockerfile, will use it").await?;
            return Ok(AnalysisResult::dockerfile());
        }

        if self.exists(REQUIREMENTS).await? {
            self.notice("requirements.txt found").await?;
        } else {
            self.negotiate_inference(inbound).await?;
        }

        let manifest = self.src_dir.join(REQUIREMENTS);
        let content = tokio::fs::read_to_string(&manifest)
            .await
            .map_err(|e| SessionError::internal("read requirements.txt", e))?;

        let result = python_result(scan(&content));
        debug!(?result, "Scanned requirements.txt");
        Ok(result)
    }

    async fn exists(&self, name: &str) -> Result<bool, SessionError> {
        tokio::fs::try_exists(self.src_dir.join(name))
            .await
            .map_err(|e| SessionError::internal(&format!("stat {}", name), e))
    }

    async fn notice(&self, text: &str) -> Result<(), SessionError> {
        self.outbox
            .notice(text)
            .await
            .map_err(|e| SessionError::internal("stream send", e))
    }

    async fn negotiate_inference(&self, inbound: &mut Inbound) -> Result<(), SessionError> {
        self.outbox
            .send(ServerMessage::Choice(inference_choice()))
            .await
            .map_err(|e| SessionError::internal("stream send", e))?;

        debug!("Waiting for choice");
        match inbound.next().await? {
            ClientRequest::Cancel => Err(SessionError::user("analysis canceled")),
            ClientRequest::Empty => Err(SessionError::user("expected choice for requirements.txt")),
            ClientRequest::Choice(false) => Err(SessionError::user(
                "can't continue without requirements.txt; please provide one!",
            )),
            ClientRequest::Choice(true) => self.infer_requirements().await,
        }
    }

    async fn infer_requirements(&self) -> Result<(), SessionError> {
        info!("Creating requirements.txt");

        let definition = llb::definition(&plan::inference_plan(), Some(self.src_dir.as_path()))
            .map_err(|e| SessionError::internal("marshal", e))?;
        let request = SolveRequest::llb(definition).with_local(CONTEXT_NAME, &self.src_dir);

        let solved = solve_with_progress(self.engine, request, self.outbox)
            .await
            .map_err(|e| SessionError::internal("build", e))?;

        let read = self.engine.read_file(&solved, INFERRED_REQUIREMENTS).await;
        if let Err(e) = self.engine.discard(&solved).await {
            warn!("image Release: {:#}", e);
        }
        let content = read.map_err(|e| SessionError::internal("ref readfile", e))?;

        tokio::fs::write(self.src_dir.join(REQUIREMENTS), &content)
            .await
            .map_err(|e| SessionError::internal("write requirements.txt", e))?;

        info!(bytes = content.len(), "Wrote inferred requirements.txt");
        Ok(())
    }
}
