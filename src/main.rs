use deckhand::cli::commands::{CliArgs, Commands};
use deckhand::cli::handlers::{handle_health, handle_plan, handle_serve};
use deckhand::util::{init_logging, parse_level, LoggingConfig};
use deckhand::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("deckhand v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Serve(serve_args) => handle_serve(serve_args).await,
        Commands::Plan(plan_args) => handle_plan(plan_args).await,
        Commands::Health(health_args) => handle_health(health_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("DECKHAND_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let config = if args.log_json {
        LoggingConfig {
            level,
            ..LoggingConfig::production()
        }
    } else {
        LoggingConfig::with_level(level)
    };
    init_logging(config);
}
