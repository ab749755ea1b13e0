//! Error taxonomy for reconciliation attempts.
//!
//! Cluster failures are classified into the handful of categories the
//! commit engine branches on. Everything else is either a transport failure
//! or a failure raised by a step.

use crate::change::ChangeSet;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// A create hit an object with the same key.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed (stale resourceVersion).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Restart the pass. Internal only, never returned from the pipeline.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A newer version of an object exists that this engine does not own.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The desired body was rejected by validation or admission.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown kind '{kind}' in apiGroup '{group}'")]
    UnknownKind { group: String, kind: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("step {name} failed: {source}")]
    Step {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// One or more changes failed to apply. The change set records which.
    #[error("{message}")]
    Apply {
        message: String,
        changes: Box<ChangeSet>,
    },

    #[error("gave up after {passes} passes: {last}")]
    RetriesExhausted { passes: u32, last: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }

    pub fn is_failed_precondition(&self) -> bool {
        matches!(self, Error::FailedPrecondition(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// The partial change set carried by an apply failure.
    pub fn changes(&self) -> Option<&ChangeSet> {
        match self {
            Error::Apply { changes, .. } => Some(changes),
            _ => None,
        }
    }
}
