use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Push-to-deploy session server backed by BuildKit
#[derive(Parser, Debug)]
#[command(
    name = "deckhand",
    about = "Push-to-deploy session server backed by BuildKit",
    version,
    long_about = "deckhand accepts push sessions, analyzes the pushed source tree, builds it \
                  with BuildKit and runs the result, streaming build and app logs back to \
                  the client."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the session server",
        long_about = "Listens for push sessions and drives analysis, build and run for each.\n\n\
                      Examples:\n  \
                      deckhand serve\n  \
                      deckhand serve --listen 0.0.0.0:50051 --src /srv/app"
    )]
    Serve(ServeArgs),

    #[command(
        about = "Show the build plan for a directory",
        long_about = "Analyzes a directory without a client and prints the build plan that \
                      a session would use.\n\n\
                      Examples:\n  \
                      deckhand plan\n  \
                      deckhand plan /path/to/app --format graph"
    )]
    Plan(PlanArgs),

    #[command(about = "Check that buildctl and Docker are reachable")]
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, value_name = "ADDR", help = "Address to listen on")]
    pub listen: Option<String>,

    #[arg(long, value_name = "DIR", help = "Source directory sessions operate on")]
    pub src: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "BuildKit daemon address")]
    pub buildkit: Option<String>,

    #[arg(
        long,
        value_name = "ADDR",
        help = "Address forwarded to the running app (empty disables)"
    )]
    pub proxy: Option<String>,

    #[arg(long, value_name = "PORT", help = "Port the app listens on in its container")]
    pub app_port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "PATH", help = "Source directory (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "json",
        help = "Output format"
    )]
    pub format: PlanFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(long, value_name = "ADDR", help = "BuildKit daemon address")]
    pub buildkit: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Graph,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_plan_args() {
        let args = CliArgs::parse_from(["deckhand", "plan"]);
        match args.command {
            Commands::Plan(plan) => {
                assert_eq!(plan.format, PlanFormat::Json);
                assert!(plan.path.is_none());
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_serve_overrides() {
        let args = CliArgs::parse_from([
            "deckhand",
            "serve",
            "--listen",
            "0.0.0.0:7000",
            "--src",
            "/srv/app",
            "--buildkit",
            "tcp://bk:1234",
        ]);
        match args.command {
            Commands::Serve(serve) => {
                assert_eq!(serve.listen.as_deref(), Some("0.0.0.0:7000"));
                assert_eq!(serve.src, Some(PathBuf::from("/srv/app")));
                assert_eq!(serve.buildkit.as_deref(), Some("tcp://bk:1234"));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["deckhand", "health", "-v"]);
        assert!(args.verbose);
        assert!(CliArgs::try_parse_from(["deckhand", "health", "-v", "-q"]).is_err());
    }
}
