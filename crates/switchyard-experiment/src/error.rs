//! Error types for experiment lifecycle operations.

use switchyard_core::ExperimentId;

use crate::experiment::State;
use crate::rule::RuleParseError;
use crate::store::RepositoryError;

/// Result type alias for experiment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during experiment lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A field-level or state-dependent validation failed.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the failed check.
        message: String,
    },

    /// An identifier (application name or label) was malformed.
    #[error("invalid identifier: {message}")]
    InvalidIdentifier {
        /// Description of what made the identifier invalid.
        message: String,
    },

    /// The requested state transition is not an edge of the lifecycle graph.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// State the experiment is currently in.
        from: State,
        /// State the caller asked for.
        to: State,
    },

    /// The experiment id is not present (or the experiment is deleted).
    #[error("experiment not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: ExperimentId,
    },

    /// A uniqueness constraint was violated or a concurrent mutation won.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The segmentation rule expression is syntactically invalid.
    #[error("invalid rule expression: {0}")]
    RuleParse(#[from] RuleParseError),

    /// A repository operation failed.
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl Error {
    /// Creates a new validation error with the given message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns true when the whole operation may be retried by the caller.
    ///
    /// The core never retries internally: by the time an error surfaces,
    /// partial progress has already been compensated.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_transient())
    }
}

impl From<RepositoryError> for Error {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict { message } => Self::Conflict { message },
            other => Self::Repository(other),
        }
    }
}

impl From<switchyard_core::Error> for Error {
    fn from(error: switchyard_core::Error) -> Self {
        match error {
            switchyard_core::Error::InvalidId { message } => Self::InvalidIdentifier { message },
            switchyard_core::Error::Internal { message } => {
                Self::Repository(RepositoryError::Schema { message })
            }
        }
    }
}
