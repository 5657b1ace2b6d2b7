//! Build plans
//!
//! A [`BuildPlan`] is the declarative description of an image build: a base
//! image followed by file and exec steps. It is lowered to LLB by
//! [`crate::llb::PlanStrategy`] and can be printed by `deckhand plan`.

pub mod python;

use serde::Serialize;

pub use python::{inference_plan, python_plan, system_packages};

/// Local directory name the build context is exposed under
pub const CONTEXT_NAME: &str = "context";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub name: String,
    pub base_image: String,
    /// Environment for every exec step, in `KEY=value` form
    pub env: Vec<String>,
    pub workdir: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    Mkdir {
        path: String,
        mode: u32,
    },
    Rm {
        path: String,
    },
    /// Copy `src` from the build context into `dest` (relative to the workdir)
    CopyContext {
        src: String,
        dest: String,
        excludes: Vec<String>,
    },
    Run {
        args: Vec<String>,
        cache_mounts: Vec<String>,
    },
}

impl PlanStep {
    pub fn run(args: &[&str]) -> Self {
        PlanStep::Run {
            args: args.iter().map(|s| s.to_string()).collect(),
            cache_mounts: Vec::new(),
        }
    }

    pub fn with_cache(mut self, path: &str) -> Self {
        if let PlanStep::Run { cache_mounts, .. } = &mut self {
            cache_mounts.push(path.to_string());
        }
        self
    }

    /// One-line human readable form
    pub fn describe(&self) -> String {
        match self {
            PlanStep::Mkdir { path, mode } => format!("mkdir {} ({:o})", path, mode),
            PlanStep::Rm { path } => format!("rm {}", path),
            PlanStep::CopyContext { src, dest, .. } => format!("copy {} {}", src, dest),
            PlanStep::Run { args, .. } => args.join(" "),
        }
    }
}

impl BuildPlan {
    pub fn new(name: impl Into<String>, base_image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_image: base_image.into(),
            env: Vec::new(),
            workdir: "/".to_string(),
            steps: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Resolve a path against the plan's working directory
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            return path.to_string();
        }
        let base = self.workdir.trim_end_matches('/');
        match path {
            "" | "." => format!("{}/", base),
            _ => format!("{}/{}", base, path.trim_start_matches("./")),
        }
    }

    pub fn uses_context(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, PlanStep::CopyContext { .. }))
    }
}
