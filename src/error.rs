//! Error types for scan submission and polling.

use thiserror::Error;

/// Failure at the boundary with the remote scan backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a usable response (connect, timeout, decode).
    #[error("{0}")]
    Transport(String),

    /// The backend answered with an error status.
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
}

impl BackendError {
    /// The human-readable detail, exactly as extracted from the response or transport.
    pub fn detail(&self) -> &str {
        match self {
            BackendError::Transport(detail) => detail,
            BackendError::Rejected { detail, .. } => detail,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Errors returned by [`crate::submitter::TaskSubmitter::submit`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Empty or malformed range expression. No request was sent.
    #[error("invalid range: {0}")]
    InvalidInput(String),

    /// The backend or transport rejected job creation.
    #[error("could not start scan: {0}")]
    Submission(String),
}

impl SubmitError {
    pub fn detail(&self) -> &str {
        match self {
            SubmitError::InvalidInput(detail) => detail,
            SubmitError::Submission(detail) => detail,
        }
    }
}

/// Terminal failures of a poll loop, delivered through `PollEvent::Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// A status query failed, or the backend reported the job as failed.
    #[error("scan failed: {0}")]
    Query(String),

    /// The backend returned a status outside the known set.
    #[error("unexpected scan status `{0}`")]
    ProtocolViolation(String),
}

impl PollError {
    pub fn detail(&self) -> &str {
        match self {
            PollError::Query(detail) => detail,
            PollError::ProtocolViolation(status) => status,
        }
    }
}
