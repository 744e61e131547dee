//! Client error type

use crate::revision::Revision;
use dsvn_core::RepoError;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Peg and operative revision were not specified consistently
    #[error("Inconsistent revision pair: peg revision {peg} with operative revision {revision}")]
    InvalidRevisionPair { peg: Revision, revision: Revision },

    /// A pool (or a context living in it) was used after teardown
    #[error("Use after destroy: {0}")]
    UseAfterDestroy(String),

    /// The operation needs a callback the context does not have bound
    #[error("Required callback is not bound: {0}")]
    UnboundRequiredCallback(&'static str),

    /// Error raised by the versioned backend, carried verbatim
    #[error("Backend error E{code}: {message}")]
    Backend { code: u32, message: String },

    /// A bound cancellation check asked to stop
    #[error("Operation cancelled")]
    Cancelled,

    /// A host callback returned an error
    #[error("Callback '{callback}' failed: {source}")]
    CallbackFailure {
        callback: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Revision kind not meaningful for the target
    #[error("Bad revision: {0}")]
    BadRevision(String),

    /// Missing, locked or malformed working copy
    #[error("Working copy error: {0}")]
    WorkingCopy(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RepoError> for ClientError {
    fn from(e: RepoError) -> Self {
        ClientError::Backend {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl ClientError {
    /// Wrap a callback error
    pub(crate) fn callback(callback: &'static str, source: anyhow::Error) -> Self {
        ClientError::CallbackFailure { callback, source }
    }

    /// Backend error code, if this error came from the backend
    pub fn backend_code(&self) -> Option<u32> {
        match self {
            ClientError::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_is_verbatim() {
        let repo_err = RepoError::NoSuchRevision(42);
        let message = repo_err.to_string();
        let err: ClientError = repo_err.into();
        match &err {
            ClientError::Backend { code, message: m } => {
                assert_eq!(*code, 160006);
                assert_eq!(m, &message);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.backend_code(), Some(160006));
    }

    #[test]
    fn test_callback_failure_keeps_source() {
        let err = ClientError::callback("log receiver", anyhow::anyhow!("receiver exploded"));
        assert!(err.to_string().contains("receiver exploded"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
