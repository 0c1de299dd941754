//! Error - Classified failures of a reconciliation pass

use std::fmt;
use std::time::Duration;

use crate::plan::Action;
use crate::provider::{ProviderError, codes};
use crate::resource::ResourceIdentity;
use crate::schema::TypeError;

/// Error taxonomy surfaced by the engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Desired state is malformed; nothing was sent to the remote system
    #[error("Invalid desired state: {}", join_errors(.0))]
    Validation(Vec<TypeError>),

    /// The remote object does not exist
    #[error("Remote resource not found: {message}")]
    NotFound { message: String },

    /// The remote object is in a state incompatible with the request
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Network, throttling or availability failure; the caller may retry
    #[error("Transient failure: {message}")]
    Transient { message: String },

    /// Gave up waiting; the remote operation may still complete
    #[error("Timed out after {waited:?} waiting for {operation}; outcome unknown")]
    Timeout { operation: String, waited: Duration },

    /// The remote system reported the request or operation failed
    #[error("Remote failure{}: {reason}", .code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    RemoteFailure {
        code: Option<String>,
        reason: String,
    },

    /// The caller cancelled the pass
    #[error("Cancelled while waiting for {operation}")]
    Cancelled { operation: String },
}

fn join_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Classify a facade error into the engine taxonomy
    pub fn classify(err: ProviderError) -> Self {
        let message = err.to_string();
        match err.code.as_deref() {
            Some(code) if codes::is_not_found(code) => Error::NotFound { message },
            Some(code) if codes::is_conflict(code) => Error::Conflict { message },
            Some(code) if codes::is_transient(code) => Error::Transient { message },
            code => Error::RemoteFailure {
                code: code.map(str::to_string),
                reason: err.message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Whether the outcome of the remote operation is unknown
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Cancelled { .. })
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::classify(err)
    }
}

/// Error of one reconciliation pass
///
/// Records which change was underway so callers can tell a pass that failed
/// before touching the remote system from one that failed part way.
#[derive(Debug)]
pub struct ReconcileError {
    /// Action being carried out, `None` if the pass failed while planning
    pub action: Option<Action>,
    /// Whether a remote mutation may already have taken effect
    pub mutated: bool,
    /// Identity of an object the pass created before failing
    ///
    /// Callers record it so the next pass refreshes the object instead of
    /// creating another one.
    pub identity: Option<ResourceIdentity>,
    pub error: Error,
}

impl ReconcileError {
    /// Failure before any action was chosen
    pub fn planning(error: impl Into<Error>) -> Self {
        Self {
            action: None,
            mutated: false,
            identity: None,
            error: error.into(),
        }
    }

    /// Failure while carrying out an action
    pub fn during(action: Action, mutated: bool, error: impl Into<Error>) -> Self {
        Self {
            action: Some(action),
            mutated,
            identity: None,
            error: error.into(),
        }
    }

    /// Attach the identity of an object that now exists remotely
    pub fn with_identity(mut self, identity: ResourceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Some(action) if self.mutated => write!(
                f,
                "{} failed after changing remote state: {}",
                action, self.error
            ),
            Some(action) => write!(f, "{} failed: {}", action, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
