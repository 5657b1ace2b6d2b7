//! Configuration for the deckhand server
//!
//! Settings are loaded from environment variables with defaults; command line
//! flags override them afterwards.
//!
//! # Environment Variables
//!
//! - `DECKHAND_LISTEN_ADDR`: session listener - default: "127.0.0.1:50051"
//! - `DECKHAND_SRC_DIR`: source tree pushed by clients - default: current directory
//! - `DECKHAND_BUILDKIT_ADDR`: buildkitd address - default: "unix:///run/buildkit/buildkitd.sock"
//! - `DECKHAND_BUILDCTL`: buildctl binary - default: "buildctl"
//! - `DECKHAND_ALLOWED_PEERS`: comma-separated peer IPs, empty allows all
//! - `DECKHAND_PROXY_ADDR`: app proxy listener, empty disables it - default: "0.0.0.0:8080"
//! - `DECKHAND_APP_PORT`: port the app listens on inside its container - default: 8080
//! - `DECKHAND_LOG_LEVEL`: logging level - default: "info"

use crate::auth::AllowList;
use crate::buildkit::BuildKitAddr;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:50051";
const DEFAULT_BUILDKIT_ADDR: &str = "unix:///run/buildkit/buildkitd.sock";
const DEFAULT_BUILDCTL: &str = "buildctl";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PROXY_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_APP_PORT: &str = "8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct DeckhandConfig {
    pub listen_addr: String,

    /// Directory sessions analyze, build and write inferred manifests into
    pub src_dir: PathBuf,

    pub buildkit_addr: String,

    pub buildctl: String,

    /// Raw comma-separated allow list
    pub allowed_peers: String,

    /// Empty when no app proxy should be started
    pub proxy_addr: String,

    pub app_port: String,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for DeckhandConfig {
    fn default() -> Self {
        let listen_addr =
            env::var("DECKHAND_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

        let src_dir = env::var("DECKHAND_SRC_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let buildkit_addr = env::var("DECKHAND_BUILDKIT_ADDR")
            .unwrap_or_else(|_| DEFAULT_BUILDKIT_ADDR.to_string());

        let buildctl =
            env::var("DECKHAND_BUILDCTL").unwrap_or_else(|_| DEFAULT_BUILDCTL.to_string());

        let allowed_peers = env::var("DECKHAND_ALLOWED_PEERS").unwrap_or_default();

        let proxy_addr =
            env::var("DECKHAND_PROXY_ADDR").unwrap_or_else(|_| DEFAULT_PROXY_ADDR.to_string());

        let app_port =
            env::var("DECKHAND_APP_PORT").unwrap_or_else(|_| DEFAULT_APP_PORT.to_string());

        let log_level = env::var("DECKHAND_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            listen_addr,
            src_dir,
            buildkit_addr,
            buildctl,
            allowed_peers,
            proxy_addr,
            app_port,
            log_level,
        }
    }
}

impl DeckhandConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an unparsable address, an unknown log level
    /// or a source directory that does not exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen()?;
        self.buildkit()?;
        self.allow_list()?;
        self.proxy()?;

        if !self.src_dir.is_dir() {
            return Err(ConfigError::ValidationFailed(format!(
                "Source directory {} does not exist",
                self.src_dir.display()
            )));
        }

        if self.buildctl.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "buildctl binary must not be empty".to_string(),
            ));
        }

        self.log_level
            .parse::<tracing::Level>()
            .map(|_| ())
            .map_err(|_| {
                ConfigError::ValidationFailed(format!(
                    "Unknown log level '{}' (expected trace, debug, info, warn or error)",
                    self.log_level
                ))
            })
    }

    pub fn listen(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::ParseError {
                field: "DECKHAND_LISTEN_ADDR".to_string(),
                error: e.to_string(),
            })
    }

    pub fn buildkit(&self) -> Result<BuildKitAddr, ConfigError> {
        self.buildkit_addr
            .parse()
            .map_err(|e: anyhow::Error| ConfigError::ParseError {
                field: "DECKHAND_BUILDKIT_ADDR".to_string(),
                error: e.to_string(),
            })
    }

    /// Proxy listener and app port, `None` when the proxy is disabled
    pub fn proxy(&self) -> Result<Option<(SocketAddr, u16)>, ConfigError> {
        let addr = self.proxy_addr.trim();
        if addr.is_empty() {
            return Ok(None);
        }

        let listen = addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::ParseError {
                field: "DECKHAND_PROXY_ADDR".to_string(),
                error: e.to_string(),
            })?;
        let port = match self.app_port.trim().parse::<u16>() {
            Ok(0) => {
                return Err(ConfigError::ValidationFailed(
                    "App port must not be 0".to_string(),
                ))
            }
            Ok(port) => port,
            Err(e) => {
                return Err(ConfigError::ParseError {
                    field: "DECKHAND_APP_PORT".to_string(),
                    error: e.to_string(),
                })
            }
        };
        Ok(Some((listen, port)))
    }

    pub fn allow_list(&self) -> Result<AllowList, ConfigError> {
        AllowList::parse(&self.allowed_peers).map_err(|e| ConfigError::ParseError {
            field: "DECKHAND_ALLOWED_PEERS".to_string(),
            error: e.to_string(),
        })
    }
}

impl fmt::Display for DeckhandConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deckhand Configuration:")?;
        writeln!(f, "  Listen: {}", self.listen_addr)?;
        writeln!(f, "  Source Dir: {}", self.src_dir.display())?;
        writeln!(f, "  BuildKit: {}", self.buildkit_addr)?;
        writeln!(f, "  buildctl: {}", self.buildctl)?;
        if self.allowed_peers.trim().is_empty() {
            writeln!(f, "  Allowed Peers: any")?;
        } else {
            writeln!(f, "  Allowed Peers: {}", self.allowed_peers)?;
        }
        if self.proxy_addr.trim().is_empty() {
            writeln!(f, "  App Proxy: disabled")?;
        } else {
            writeln!(f, "  App Proxy: {} -> app:{}", self.proxy_addr, self.app_port)?;
        }
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
