//! deckhand - push-to-deploy session server
//!
//! A client connects, the server inspects the pushed source tree, builds it
//! with BuildKit and runs the result in a container, streaming build progress
//! and application output back over the same session.
//!
//! # Session flow
//!
//! 1. Peer authorization against the configured allow list
//! 2. Source analysis: Dockerfile, `requirements.txt`, or an offer to infer one
//! 3. Build: the Dockerfile frontend, or a generated LLB graph for Python apps
//! 4. Run: the image's app process, with client cancellation escalating
//!    through SIGINT, SIGTERM and SIGKILL
//!
//! # Project Structure
//!
//! - [`session`]: per-connection orchestration
//! - [`analysis`]: source tree inspection
//! - [`plan`] and [`llb`]: build plans and their LLB lowering
//! - [`buildkit`]: build engine and container adapters
//! - [`runner`]: running the app and handling cancellation
//! - [`proxy`]: per-session forwarding to the running app
//! - [`server`]: the JSON lines transport

pub mod analysis;
pub mod auth;
pub mod buildkit;
pub mod cli;
pub mod config;
pub mod error;
pub mod llb;
pub mod plan;
pub mod protocol;
pub mod proxy;
pub mod runner;
pub mod server;
pub mod session;
pub mod util;

pub use auth::{AllowList, PeerAuthorizer};
pub use buildkit::{BuildEngine, BuildctlEngine, Container, Process};
pub use config::{ConfigError, DeckhandConfig};
pub use error::SessionError;
pub use protocol::{ActRequest, AnalysisResult, ServerMessage};
pub use session::Orchestrator;
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
