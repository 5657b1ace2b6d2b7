//! Structured logging setup
//!
//! Human readable lines by default, JSON when running under a supervisor.
//! `RUST_LOG` wins over the configured level; without it, chatty transport
//! crates are held at `warn`.

use std::fmt;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const QUIET_CRATES: &[&str] = &["h2=warn", "hyper=warn", "bollard=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Print the emitting module, e.g. `deckhand::session`
    pub with_target: bool,
    /// Print source file and line
    pub with_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::with_level(Level::INFO)
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::Text,
            with_target: true,
            with_location: false,
        }
    }

    /// JSON lines with source locations
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            with_location: true,
            ..Self::default()
        }
    }
}

/// Parse a level name, falling back to `INFO` with a note on stderr
///
/// Runs before the subscriber exists, so the note cannot go through tracing.
pub fn parse_level(name: &str) -> Level {
    Level::from_str(name.trim()).unwrap_or_else(|_| {
        eprintln!(
            "Unknown log level '{}', using info (expected trace, debug, info, warn or error)",
            name
        );
        Level::INFO
    })
}

fn build_filter(level: Level, rust_log_set: bool) -> EnvFilter {
    if rust_log_set {
        return EnvFilter::from_default_env();
    }

    let own = format!("deckhand={}", level);
    std::iter::once(own.as_str())
        .chain(QUIET_CRATES.iter().copied())
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::default(), EnvFilter::add_directive)
}

/// Install the global subscriber; calls after the first one are no-ops
pub fn init_logging(config: LoggingConfig) {
    let filter = build_filter(config.level, std::env::var_os("RUST_LOG").is_some());

    let (json, text) = match config.format {
        LogFormat::Json => (
            Some(
                tfmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_file(config.with_location)
                    .with_line_number(config.with_location)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                tfmt::layer()
                    .with_target(config.with_target)
                    .with_file(config.with_location)
                    .with_line_number(config.with_location)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level(" warn "), Level::WARN);
        assert_eq!(parse_level("ERROR"), Level::ERROR);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_filter_quiets_transport_crates() {
        let filter = build_filter(Level::DEBUG, false).to_string();
        assert!(filter.contains("deckhand=debug"));
        assert!(filter.contains("bollard=warn"));
        assert!(filter.contains("h2=warn"));
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LoggingConfig::production().format, LogFormat::Json);
        assert!(!LoggingConfig::default().with_location);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LoggingConfig::with_level(Level::WARN));
        init_logging(LoggingConfig::production());
    }
}
