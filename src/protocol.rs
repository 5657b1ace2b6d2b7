//! Session wire messages
//!
//! A session is a bidirectional stream of JSON objects. The client sends
//! [`ActRequest`]s (an empty initial request, cancellations and choice
//! responses), the server answers with [`ServerMessage`]s.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source tag for messages produced by the server itself
pub const SOURCE_SERVER: &str = "deckhand";
/// Source tag for rendered build progress
pub const SOURCE_BUILDKIT: &str = "buildkit";
/// Source tag for output of the running application
pub const SOURCE_APP: &str = "app";

/// Raw client message as it arrives on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActRequest {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_response: Option<bool>,
}

impl ActRequest {
    pub fn cancel() -> Self {
        Self {
            cancel: true,
            choice_response: None,
        }
    }

    pub fn choice(value: bool) -> Self {
        Self {
            cancel: false,
            choice_response: Some(value),
        }
    }

    /// Resolve the populated variant; at most one may be set
    pub fn classify(&self) -> Result<ClientRequest, ProtocolError> {
        match (self.cancel, self.choice_response) {
            (true, Some(_)) => Err(ProtocolError::AmbiguousRequest),
            (true, None) => Ok(ClientRequest::Cancel),
            (false, Some(value)) => Ok(ClientRequest::Choice(value)),
            (false, None) => Ok(ClientRequest::Empty),
        }
    }
}

/// A client message with exactly one variant resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// No variant populated; only valid as the initial request
    Empty,
    Cancel,
    Choice(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request carries both a cancellation and a choice response")]
    AmbiguousRequest,

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Accumulated decision record for a push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub use_dockerfile: bool,
    pub use_python_requirements: bool,
    pub needs_git: bool,
    #[serde(rename = "needsLibGL")]
    pub needs_lib_gl: bool,
    pub needs_lib_glib: bool,
}

impl AnalysisResult {
    pub fn dockerfile() -> Self {
        Self {
            use_dockerfile: true,
            ..Default::default()
        }
    }

    /// True when any system package has to be installed before pip runs
    pub fn needs_system_packages(&self) -> bool {
        self.needs_git || self.needs_lib_gl || self.needs_lib_glib
    }
}

/// A yes/no question posed to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub title: String,
    pub description: String,
    pub affirmative: String,
    pub negative: String,
    pub default_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub source: String,
    pub text: String,
}

/// Server to client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    Log(LogLine),
    Choice(Choice),
    AnalysisResult(AnalysisResult),
    Error(String),
    /// Successful end of the session
    Done {},
}

impl ServerMessage {
    pub fn log(source: impl Into<String>, text: impl Into<String>) -> Self {
        ServerMessage::Log(LogLine {
            source: source.into(),
            text: text.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::Error(_) | ServerMessage::Done {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_requests() {
        assert_eq!(ActRequest::default().classify(), Ok(ClientRequest::Empty));
        assert_eq!(ActRequest::cancel().classify(), Ok(ClientRequest::Cancel));
        assert_eq!(
            ActRequest::choice(false).classify(),
            Ok(ClientRequest::Choice(false))
        );

        let both = ActRequest {
            cancel: true,
            choice_response: Some(true),
        };
        assert_eq!(both.classify(), Err(ProtocolError::AmbiguousRequest));
    }

    #[test]
    fn test_request_wire_format() {
        let req: ActRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, ActRequest::default());

        let req: ActRequest = serde_json::from_str(r#"{"cancel":true}"#).unwrap();
        assert!(req.cancel);

        let req: ActRequest = serde_json::from_str(r#"{"choiceResponse":false}"#).unwrap();
        assert_eq!(req.choice_response, Some(false));

        assert!(serde_json::from_str::<ActRequest>(r#"{"bogus":1}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        let log = serde_json::to_value(ServerMessage::log(SOURCE_APP, "hello")).unwrap();
        assert_eq!(
            log,
            serde_json::json!({"log": {"source": "app", "text": "hello"}})
        );

        let result = serde_json::to_value(ServerMessage::AnalysisResult(AnalysisResult {
            use_python_requirements: true,
            needs_lib_gl: true,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(result["analysisResult"]["needsLibGL"], true);
        assert_eq!(result["analysisResult"]["usePythonRequirements"], true);
        assert_eq!(result["analysisResult"]["needsLibGlib"], false);

        let done = serde_json::to_string(&ServerMessage::Done {}).unwrap();
        assert_eq!(done, r#"{"done":{}}"#);
        assert!(ServerMessage::Done {}.is_terminal());
        assert!(ServerMessage::Error("x".into()).is_terminal());
    }

    #[test]
    fn test_system_packages_hint() {
        assert!(!AnalysisResult::default().needs_system_packages());
        assert!(AnalysisResult {
            needs_git: true,
            ..Default::default()
        }
        .needs_system_packages());
        assert!(AnalysisResult::dockerfile().use_dockerfile);
    }
}
