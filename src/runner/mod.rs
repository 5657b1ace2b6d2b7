pub mod log_sink;
pub mod process;

pub use log_sink::{LogSink, SinkError};
pub use process::{run_in_container, CancellationState};

/// Working directory of the app process
pub const APP_CWD: &str = "/app";

/// Entrypoint started in every app container
pub fn app_command() -> Vec<String> {
    vec!["python".to_string(), "__main__.py".to_string()]
}
