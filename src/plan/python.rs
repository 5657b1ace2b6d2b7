use super::{BuildPlan, PlanStep};
use crate::protocol::AnalysisResult;

pub const PYTHON_IMAGE: &str = "docker.io/library/python:3.12-slim";
pub const APP_DIR: &str = "/app";
pub const PIP_CACHE: &str = "/root/.cache/pip";
pub const APT_CACHE: &str = "/var/cache/apt";

/// Path the inference build leaves the generated requirements at
pub const INFERRED_REQUIREMENTS: &str = "/app/requirements.txt";

/// Base image prepared for pip and apt with persistent caches
fn python_slim(name: &str) -> BuildPlan {
    BuildPlan::new(name, PYTHON_IMAGE)
        .env("PYTHONUNBUFFERED", "True")
        .step(PlanStep::Mkdir {
            path: APP_DIR.to_string(),
            mode: 0o755,
        })
        .workdir(APP_DIR)
        .step(PlanStep::Rm {
            path: "/etc/apt/apt.conf.d/docker-clean".to_string(),
        })
}

/// System packages required by the detected dependencies, in install order
pub fn system_packages(analysis: &AnalysisResult) -> Vec<&'static str> {
    let mut packages = Vec::new();
    if analysis.needs_git {
        packages.push("git");
    }
    if analysis.needs_lib_gl {
        packages.push("libgl1");
    }
    if analysis.needs_lib_glib {
        packages.push("libglib2.0-0");
    }
    packages
}

/// Image that runs the app: system packages, pip dependencies, then sources
pub fn python_plan(analysis: &AnalysisResult) -> BuildPlan {
    let mut plan = python_slim("python-app");

    let packages = system_packages(analysis);
    if !packages.is_empty() {
        let script = format!("apt update && apt install -y {}", packages.join(" "));
        plan = plan.step(PlanStep::run(&["dash", "-c", &script]).with_cache(APT_CACHE));
    }

    plan.step(PlanStep::CopyContext {
        src: "requirements.txt".to_string(),
        dest: ".".to_string(),
        excludes: vec![".venv".to_string(), ".git".to_string()],
    })
    .step(PlanStep::run(&["pip", "install", "-r", "requirements.txt"]).with_cache(PIP_CACHE))
    .step(PlanStep::CopyContext {
        src: ".".to_string(),
        dest: ".".to_string(),
        excludes: vec![".venv".to_string(), ".git".to_string()],
    })
}

/// Image that guesses `requirements.txt` from imports using pipreqs
pub fn inference_plan() -> BuildPlan {
    python_slim("requirements-inference")
        .step(PlanStep::run(&["pip", "install", "pipreqs"]).with_cache(PIP_CACHE))
        .step(PlanStep::CopyContext {
            src: ".".to_string(),
            dest: ".".to_string(),
            excludes: vec![".git".to_string()],
        })
        .step(PlanStep::run(&["pipreqs"]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_steps(plan: &BuildPlan) -> Vec<String> {
        plan.steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Run { .. }))
            .map(|s| s.describe())
            .collect()
    }

    #[test]
    fn test_plain_python_plan_has_no_apt_step() {
        let plan = python_plan(&AnalysisResult::default());
        assert_eq!(plan.base_image, PYTHON_IMAGE);
        assert_eq!(plan.workdir, "/app");
        assert_eq!(plan.env, vec!["PYTHONUNBUFFERED=True"]);
        assert_eq!(run_steps(&plan), vec!["pip install -r requirements.txt"]);
    }

    #[test]
    fn test_system_packages_in_fixed_order() {
        let analysis = AnalysisResult {
            use_python_requirements: true,
            needs_git: true,
            needs_lib_gl: true,
            needs_lib_glib: true,
            ..Default::default()
        };
        assert_eq!(
            system_packages(&analysis),
            vec!["git", "libgl1", "libglib2.0-0"]
        );

        let plan = python_plan(&analysis);
        assert_eq!(
            run_steps(&plan)[0],
            "dash -c apt update && apt install -y git libgl1 libglib2.0-0"
        );
        assert!(matches!(
            &plan.steps[2],
            PlanStep::Run { cache_mounts, .. } if cache_mounts == &vec![APT_CACHE.to_string()]
        ));
    }

    #[test]
    fn test_only_opencv_packages() {
        let analysis = AnalysisResult {
            needs_lib_gl: true,
            needs_lib_glib: true,
            ..Default::default()
        };
        assert_eq!(system_packages(&analysis), vec!["libgl1", "libglib2.0-0"]);
    }

    #[test]
    fn test_requirements_copied_before_sources() {
        let plan = python_plan(&AnalysisResult::default());
        let copies: Vec<String> = plan
            .steps
            .iter()
            .filter(|s| matches!(s, PlanStep::CopyContext { .. }))
            .map(|s| s.describe())
            .collect();
        assert_eq!(copies, vec!["copy requirements.txt .", "copy . ."]);
    }

    #[test]
    fn test_inference_plan_runs_pipreqs_last() {
        let plan = inference_plan();
        assert_eq!(run_steps(&plan), vec!["pip install pipreqs", "pipreqs"]);
        assert!(plan.uses_context());
        assert_eq!(plan.resolve("requirements.txt"), INFERRED_REQUIREMENTS);
    }
}
