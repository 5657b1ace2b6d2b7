mod builder;
pub mod pb;
mod strategy;

pub use builder::LLBBuilder;
pub use strategy::{BuildStrategy, PlanStrategy, DEFAULT_PATH};

use crate::plan::{BuildPlan, CONTEXT_NAME};
use anyhow::Result;
use std::path::Path;

/// Serialize a plan into an LLB definition
///
/// With `context_path` set, the local source carries a content hash of
/// that directory.
pub fn definition(plan: &BuildPlan, context_path: Option<&Path>) -> Result<Vec<u8>> {
    let mut builder = LLBBuilder::new(CONTEXT_NAME);
    if let Some(path) = context_path {
        builder = builder.with_context_path(path.to_path_buf());
    }
    PlanStrategy.build_graph(&mut builder, plan)?;
    builder.to_bytes()
}

/// Op graph of a plan as text
pub fn graph(plan: &BuildPlan) -> Result<String> {
    let mut builder = LLBBuilder::new(CONTEXT_NAME);
    PlanStrategy.build_graph(&mut builder, plan)?;
    Ok(builder.graph())
}
