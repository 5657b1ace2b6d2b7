use super::commands::{HealthArgs, PlanArgs, PlanFormat, ServeArgs};
use crate::analysis::analyze_offline;
use crate::buildkit::{BuildKitAddr, BuildctlEngine};
use crate::config::DeckhandConfig;
use crate::llb;
use crate::plan::python_plan;
use crate::server;
use crate::session::Orchestrator;
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub async fn handle_serve(args: &ServeArgs) -> i32 {
    let defaults = DeckhandConfig::default();
    let config = DeckhandConfig {
        listen_addr: args.listen.clone().unwrap_or(defaults.listen_addr),
        src_dir: args.src.clone().unwrap_or(defaults.src_dir),
        buildkit_addr: args.buildkit.clone().unwrap_or(defaults.buildkit_addr),
        proxy_addr: args.proxy.clone().unwrap_or(defaults.proxy_addr),
        app_port: args
            .app_port
            .map(|port| port.to_string())
            .unwrap_or(defaults.app_port),
        ..defaults
    };

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("\nPlease check your environment variables and command-line arguments.");
        return 1;
    }
    debug!("{}", config);

    let (listen, buildkit, allow_list, proxy) = match (
        config.listen(),
        config.buildkit(),
        config.allow_list(),
        config.proxy(),
    ) {
        (Ok(listen), Ok(buildkit), Ok(allow_list), Ok(proxy)) => {
            (listen, buildkit, allow_list, proxy)
        }
        _ => return 1,
    };

    if !buildkit.looks_reachable() {
        error!("BuildKit socket not found at {}", buildkit);
        return 1;
    }

    let engine = match BuildctlEngine::new(config.buildctl.clone(), buildkit) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to set up build engine: {:#}", e);
            return 1;
        }
    };

    let src_dir = match config.src_dir.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to canonicalize source directory: {}", e);
            return 1;
        }
    };

    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", listen, e);
            return 1;
        }
    };

    if allow_list.is_open() {
        info!("No peer allow list configured, accepting all peers");
    }
    let mut orchestrator = Orchestrator::new(src_dir, Arc::new(engine), Arc::new(allow_list));
    if let Some((proxy_addr, app_port)) = proxy {
        info!("Forwarding {} to app port {} during sessions", proxy_addr, app_port);
        orchestrator = orchestrator.with_proxy(proxy_addr, app_port);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    match server::serve(listener, orchestrator, shutdown).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Server failed: {:#}", e);
            1
        }
    }
}

pub async fn handle_plan(args: &PlanArgs) -> i32 {
    let path = match args.path.clone() {
        Some(path) => path,
        None => match env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to get current directory: {}", e);
                return 1;
            }
        },
    };

    if !path.is_dir() {
        error!("Source path is not a directory: {}", path.display());
        return 1;
    }

    let analysis = match analyze_offline(&path) {
        Ok(Some(analysis)) => analysis,
        Ok(None) => {
            eprintln!(
                "No requirements.txt in {}; a session would offer to guess it.",
                path.display()
            );
            return 1;
        }
        Err(e) => {
            error!("Failed to analyze {}: {:#}", path.display(), e);
            return 1;
        }
    };

    if analysis.use_dockerfile {
        println!("Dockerfile found; the build is delegated to the Dockerfile frontend.");
        return 0;
    }

    let plan = python_plan(&analysis);
    let rendered = match args.format {
        PlanFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "analysis": analysis,
            "plan": plan,
        }))
        .map_err(anyhow::Error::from),
        PlanFormat::Graph => llb::graph(&plan),
    };

    match rendered {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            error!("Failed to render plan: {:#}", e);
            1
        }
    }
}

pub async fn handle_health(args: &HealthArgs) -> i32 {
    let config = DeckhandConfig::default();
    let addr = args.buildkit.clone().unwrap_or(config.buildkit_addr);

    let addr: BuildKitAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    let engine = match BuildctlEngine::new(config.buildctl, addr) {
        Ok(engine) => engine,
        Err(e) => {
            println!("Docker: unavailable ({:#})", e);
            return 1;
        }
    };

    match engine.check().await {
        Ok(()) => {
            println!("BuildKit: available at {}", engine.addr());
            println!("Docker: available");
            0
        }
        Err(e) => {
            println!("Unavailable: {:#}", e);
            1
        }
    }
}

