use super::builder::LLBBuilder;
use super::pb;
use crate::plan::{BuildPlan, PlanStep};
use anyhow::Result;

pub const DEFAULT_PATH: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub trait BuildStrategy {
    fn build_graph(&self, builder: &mut LLBBuilder, plan: &BuildPlan) -> Result<()>;
}

/// Lowers every plan step into one op chained on the previous root
pub struct PlanStrategy;

impl BuildStrategy for PlanStrategy {
    fn build_graph(&self, builder: &mut LLBBuilder, plan: &BuildPlan) -> Result<()> {
        let mut env = vec![DEFAULT_PATH.to_string()];
        env.extend(plan.env.iter().cloned());

        let mut root = builder.create_image_source(&plan.base_image);

        for step in &plan.steps {
            let name = Some(format!("[{}] {}", plan.name, step.describe()));
            root = match step {
                PlanStep::Mkdir { path, mode } => builder.create_file(
                    vec![(root, 0)],
                    pb::FileAction {
                        input: 0,
                        secondary_input: -1,
                        output: 0,
                        action: Some(pb::file_action::Action::Mkdir(pb::FileActionMkDir {
                            path: path.clone(),
                            mode: *mode as i32,
                            make_parents: true,
                            timestamp: -1,
                        })),
                    },
                    name,
                ),
                PlanStep::Rm { path } => builder.create_file(
                    vec![(root, 0)],
                    pb::FileAction {
                        input: 0,
                        secondary_input: -1,
                        output: 0,
                        action: Some(pb::file_action::Action::Rm(pb::FileActionRm {
                            path: path.clone(),
                            allow_not_found: true,
                            allow_wildcard: false,
                        })),
                    },
                    name,
                ),
                PlanStep::CopyContext {
                    src,
                    dest,
                    excludes,
                } => {
                    let context = builder.create_local_source(excludes);
                    builder.create_file(
                        vec![(root, 0), (context, 0)],
                        pb::FileAction {
                            input: 0,
                            secondary_input: 1,
                            output: 0,
                            action: Some(pb::file_action::Action::Copy(pb::FileActionCopy {
                                src: context_path(src),
                                dest: plan.resolve(dest),
                                mode: -1,
                                follow_symlink: true,
                                dir_copy_contents: true,
                                create_dest_path: true,
                                allow_wildcard: true,
                                allow_empty_wildcard: true,
                                timestamp: -1,
                                exclude_patterns: vec![],
                            })),
                        },
                        name,
                    )
                }
                PlanStep::Run { args, cache_mounts } => {
                    let meta = pb::Meta {
                        args: args.clone(),
                        env: env.clone(),
                        cwd: plan.workdir.clone(),
                        user: String::new(),
                        hostname: String::new(),
                    };

                    let mut mounts = vec![builder.layer_mount(0, 0, "/")];
                    for cache in cache_mounts {
                        mounts.push(builder.cache_mount(cache));
                    }

                    builder.create_exec(vec![(root, 0)], mounts, meta, name)
                }
            };
        }

        builder.create_output_reference(root);
        Ok(())
    }
}

fn context_path(src: &str) -> String {
    match src.trim_start_matches("./") {
        "" | "." => "/".to_string(),
        rest => format!("/{}", rest.trim_start_matches('/')),
    }
}
