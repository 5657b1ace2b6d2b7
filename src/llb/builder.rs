use super::pb;
use anyhow::{Context, Result};
use prost::Message;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

const CUSTOM_NAME: &str = "llb.customname";
const IMAGE_SCHEME: &str = "docker-image://";
const LOCAL_SCHEME: &str = "local://";

/// Reference to output `index` of the op at position `op`
pub(crate) type OpOutput = (i64, i64);

/// Accumulates a content-addressed op graph
///
/// Ops are keyed by the sha256 of their encoding, so adding an op that
/// already exists returns the existing position.
pub struct LLBBuilder {
    pub(crate) context_name: String,
    pub(crate) context_path: Option<PathBuf>,

    pub(crate) ops: Vec<pb::Op>,
    pub(crate) digests: Vec<String>,
    names: BTreeMap<String, pb::OpMetadata>,
}

impl LLBBuilder {
    pub fn new(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            context_path: None,
            ops: Vec::new(),
            digests: Vec::new(),
            names: BTreeMap::new(),
        }
    }

    /// Hash the context directory into the local source so edits bust the cache
    pub fn with_context_path(mut self, context_path: PathBuf) -> Self {
        self.context_path = Some(context_path);
        self
    }

    fn push(&mut self, inputs: &[OpOutput], kind: Option<pb::op::Op>, name: Option<String>) -> i64 {
        let platform = kind.as_ref().map(|_| pb::Platform {
            architecture: "amd64".into(),
            os: "linux".into(),
            variant: String::new(),
        });
        let op = pb::Op {
            inputs: inputs
                .iter()
                .map(|&(op, index)| pb::Input {
                    digest: self.digests[op as usize].clone(),
                    index,
                })
                .collect(),
            op: kind,
            platform,
        };

        let digest = format!("sha256:{}", hex::encode(Sha256::digest(op.encode_to_vec())));
        if let Some(existing) = self.digests.iter().position(|d| *d == digest) {
            return existing as i64;
        }

        if let Some(name) = name {
            self.names.insert(
                digest.clone(),
                pb::OpMetadata {
                    ignore_cache: false,
                    description: BTreeMap::from([(CUSTOM_NAME.to_string(), name)]),
                },
            );
        }

        self.ops.push(op);
        self.digests.push(digest);
        self.ops.len() as i64 - 1
    }

    pub(crate) fn create_image_source(&mut self, image_ref: &str) -> i64 {
        let source = pb::SourceOp {
            identifier: format!("{}{}", IMAGE_SCHEME, image_ref),
            attrs: BTreeMap::new(),
        };
        self.push(&[], Some(pb::op::Op::Source(source)), Some(format!("FROM {}", image_ref)))
    }

    /// Source for the client's tree, minus `excludes`
    pub(crate) fn create_local_source(&mut self, excludes: &[String]) -> i64 {
        let mut attrs = BTreeMap::new();

        if !excludes.is_empty() {
            let encoded = serde_json::to_string(excludes).unwrap_or_else(|_| "[]".into());
            attrs.insert("local.excludepatterns".to_string(), encoded);
        }

        if let Some(dir) = &self.context_path {
            match context_hash(dir, excludes) {
                Ok(hash) => {
                    attrs.insert("local.unique".to_string(), hash);
                }
                Err(e) => debug!("Skipping context hash for {}: {:#}", dir.display(), e),
            }
        }

        let source = pb::SourceOp {
            identifier: format!("{}{}", LOCAL_SCHEME, self.context_name),
            attrs,
        };
        let name = format!("load {}", self.context_name);
        self.push(&[], Some(pb::op::Op::Source(source)), Some(name))
    }

    pub(crate) fn create_exec(
        &mut self,
        inputs: Vec<OpOutput>,
        mounts: Vec<pb::Mount>,
        meta: pb::Meta,
        name: Option<String>,
    ) -> i64 {
        let exec = pb::ExecOp {
            meta: Some(meta),
            mounts,
            network: pb::NetMode::Unset as i32,
            security: pb::SecurityMode::Sandbox as i32,
        };
        self.push(&inputs, Some(pb::op::Op::Exec(exec)), name)
    }

    pub(crate) fn create_file(
        &mut self,
        inputs: Vec<OpOutput>,
        action: pb::FileAction,
        name: Option<String>,
    ) -> i64 {
        let file = pb::FileOp {
            actions: vec![action],
        };
        self.push(&inputs, Some(pb::op::Op::File(file)), name)
    }

    /// Terminal op marking `root` as the result
    pub(crate) fn create_output_reference(&mut self, root: i64) -> i64 {
        self.push(&[(root, 0)], None, None)
    }

    /// Persistent cache keyed by its path, one writer at a time
    pub(crate) fn cache_mount(&self, dest: &str) -> pb::Mount {
        pb::Mount {
            mount_type: pb::MountType::Cache as i32,
            cache_opt: Some(pb::CacheOpt {
                id: dest.to_string(),
                sharing: pb::CacheSharingOpt::Locked as i32,
            }),
            ..scratch_mount(dest)
        }
    }

    pub(crate) fn layer_mount(&self, input: i64, output: i64, dest: &str) -> pb::Mount {
        pb::Mount {
            input,
            output,
            ..scratch_mount(dest)
        }
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        debug!(ops = self.ops.len(), "Marshalling LLB\n{}", self.graph());

        let definition = pb::Definition {
            def: self.ops.iter().map(Message::encode_to_vec).collect(),
            metadata: self.names.clone(),
        };
        Ok(definition.encode_to_vec())
    }

    /// Human readable dump of the op graph
    pub fn graph(&self) -> String {
        let mut out = String::new();
        for (idx, (op, digest)) in self.ops.iter().zip(&self.digests).enumerate() {
            let _ = write!(out, "{} ({}) -> ", idx, short_digest(digest));
            describe_op(&mut out, op);

            for (i, input) in op.inputs.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "          input[{}]: digest={}, index={}",
                    i,
                    short_digest(&input.digest),
                    input.index
                );
            }
        }
        out
    }
}

fn scratch_mount(dest: &str) -> pb::Mount {
    pb::Mount {
        input: -1,
        selector: String::new(),
        dest: dest.to_string(),
        output: -1,
        readonly: false,
        mount_type: pb::MountType::Bind as i32,
        cache_opt: None,
    }
}

fn describe_op(out: &mut String, op: &pb::Op) {
    use pb::file_action::Action;

    let _ = match &op.op {
        Some(pb::op::Op::Source(source)) => match source.identifier.strip_prefix(IMAGE_SCHEME) {
            Some(image) => writeln!(out, "FROM {}", image),
            None => writeln!(out, "SOURCE {}", source.identifier),
        },
        Some(pb::op::Op::Exec(exec)) => {
            let args = exec.meta.as_ref().map(|m| m.args.join(" ")).unwrap_or_default();
            let _ = writeln!(out, "EXEC {}", args);
            for mount in &exec.mounts {
                let kind = pb::MountType::try_from(mount.mount_type)
                    .map(|t| t.label())
                    .unwrap_or("UNKNOWN");
                let _ = writeln!(
                    out,
                    "          {} ({}) -> {} -> {}",
                    mount.input, kind, mount.dest, mount.output
                );
            }
            Ok(())
        }
        Some(pb::op::Op::File(file)) => file.actions.iter().try_for_each(|a| match &a.action {
            Some(Action::Copy(copy)) => writeln!(out, "COPY {} {}", copy.src, copy.dest),
            Some(Action::Mkdir(mkdir)) => writeln!(out, "MKDIR {}", mkdir.path),
            Some(Action::Rm(rm)) => writeln!(out, "RM {}", rm.path),
            None => writeln!(out, "FILE"),
        }),
        None => writeln!(out, "OUTPUT"),
    };
}

fn short_digest(digest: &str) -> &str {
    let end = "sha256:".len() + 12;
    digest.get(..end).unwrap_or(digest)
}

/// Fingerprint of a directory: relative paths, sizes and mtimes, walk order sorted
fn context_hash(root: &Path, excludes: &[String]) -> Result<String> {
    let excluded = excludes.to_vec();
    let mut entries = Vec::new();
    for entry in ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .filter_entry(move |e| {
            let name = e.file_name().to_string_lossy();
            !excluded.iter().any(|p| *p == name)
        })
        .build()
    {
        match entry {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Unreadable context entry: {}", e),
        }
    }
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    let mut hasher = Sha256::new();
    for entry in &entries {
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("walk left the context root")?;
        hasher.update(rel.to_string_lossy().as_bytes());

        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            warn!("Skipping metadata of {}", entry.path().display());
            continue;
        };
        hasher.update(meta.len().to_le_bytes());
        if let Some(secs) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
        {
            hasher.update(secs.to_le_bytes());
        }
    }

    Ok(hex::encode(hasher.finalize()))
}
