//! Error taxonomy for the control loop.
//!
//! Split along one line: errors that mean the environment is unusable (capture broken,
//! decision service unreachable) end the run; errors scoped to a single step are recorded
//! into history and fed back to the decision model.

use thiserror::Error;

pub use crate::agent::wire::DecisionParseError;

/// Transport-level failure talking to one of the model services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("non-success status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Transport(err.to_string())
        }
    }

    /// Network hiccups that a fresh attempt might not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Timeout | ServiceError::Transport(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroundingError {
    #[error("invalid target description: {0}")]
    InvalidDescription(String),
    #[error("grounding service error: {0}")]
    Service(#[from] ServiceError),
}

impl GroundingError {
    pub fn is_transient(&self) -> bool {
        match self {
            GroundingError::InvalidDescription(_) => false,
            GroundingError::Service(err) => err.is_transient(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// Loop-fatal.
    #[error("decision service error: {0}")]
    Service(#[from] ServiceError),
    /// Recoverable: the loop records a corrective entry and observes again.
    #[error("decision parse error: {0}")]
    Parse(#[from] DecisionParseError),
}

/// Failure reported by the input control surface for a single op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("game window lost focus")]
    FocusLost,
    #[error("input rejected: {0}")]
    Rejected(String),
    #[error("control transport error: {0}")]
    Transport(String),
}

/// Partial-execution failure of an input sequence; `completed` events already happened.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("focus lost after {completed}/{total} events")]
    FocusLost { completed: usize, total: usize },
    #[error("control failure after {completed}/{total} events: {source}")]
    Control {
        completed: usize,
        total: usize,
        source: ControlError,
    },
}
