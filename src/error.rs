use thiserror::Error;

/// Sign-in or sign-up rejected by the auth service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a table operation against the backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("no active session")]
    NoSession,
}

/// Errors surfaced by the dashboard controller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DashboardError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("write failed: {0}")]
    Write(#[source] GatewayError),

    #[error("read failed: {0}")]
    Read(#[source] GatewayError),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid directive: {0}")]
    Invalid(&'static str),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("unknown directive {0}")]
    UnknownDirective(String),
}
