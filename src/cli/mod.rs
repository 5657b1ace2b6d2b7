pub mod commands;
pub mod handlers;

pub use commands::{CliArgs, Commands, HealthArgs, PlanArgs, PlanFormat, ServeArgs};
