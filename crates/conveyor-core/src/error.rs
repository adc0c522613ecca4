//! Error types for Conveyor.

use thiserror::Error;

use crate::StageId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored record changed since it was read. Expected under
    /// contention; the caller lost the race and should re-request work.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("stage {stage} already assigned to machine {machine:?}")]
    AlreadyAssigned { stage: StageId, machine: String },

    #[error("cancelled")]
    Cancelled,

    /// A lookup needed to assemble a stage's execution context failed.
    #[error("cannot load {what}: {source}")]
    Dependency {
        what: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap this error with the name of the operation that produced it.
    pub fn context(self, operation: &'static str) -> Self {
        Error::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// Wrap this error as a failed dependency lookup.
    pub fn dependency(self, what: &'static str) -> Self {
        Error::Dependency {
            what,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context and dependency wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } | Error::Dependency { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self.root(), Error::VersionConflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
