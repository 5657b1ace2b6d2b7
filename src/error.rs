use thiserror::Error;

/// Terminal outcome of a failed session
///
/// Both variants end the session. They differ in what the client gets to see:
/// an internal fault is reported as a generic failure, a user error carries
/// its message verbatim.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),

    #[error("{0}")]
    User(String),
}

/// Text sent to the client in place of internal details
pub const GENERIC_FAILURE: &str = "internal error";

impl SessionError {
    pub fn user(message: impl Into<String>) -> Self {
        SessionError::User(message.into())
    }

    pub fn internal(context: &str, err: impl Into<anyhow::Error>) -> Self {
        SessionError::Internal(err.into().context(context.to_string()))
    }

    pub fn msg(message: impl std::fmt::Display) -> Self {
        SessionError::Internal(anyhow::anyhow!("{}", message))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, SessionError::User(_))
    }

    /// Message to put on the wire for this failure
    pub fn client_message(&self) -> String {
        match self {
            SessionError::User(message) => message.clone(),
            SessionError::Internal(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Internal(err)
    }
}
