//! Error types shared by the tree model, the thread engine and the removal-path sampler.

use thiserror::Error;

/// Errors raised while editing or querying an ARG.
///
/// `Precondition` and `Structure` are contract violations: the caller handed in a malformed
/// thread path or the ARG is internally inconsistent, and the edit must be abandoned.
/// `NoRemovalPath` is not a bug. It means the queried node or time interval cannot be
/// removed under the current ARG and the caller should propose something else.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed input handed to an operation (bad node id, time out of range, ...)
    #[error("precondition violated: {message}")]
    Precondition { message: String },

    /// The ARG does not satisfy its structural invariants
    #[error("inconsistent ARG structure: {message}")]
    Structure { message: String },

    /// No admissible removal path exists for the query
    #[error("no removal path exists: {message}")]
    NoRemovalPath { message: String },
}

/// Type alias for results of ARG operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a structural inconsistency error
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }

    /// Create a degenerate removal path error
    pub fn no_removal_path(message: impl Into<String>) -> Self {
        Self::NoRemovalPath {
            message: message.into(),
        }
    }

    /// Whether the error is a legitimate sampler-skip condition rather than a contract
    /// violation.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoRemovalPath { .. })
    }
}
