//! Backend error type
//!
//! Every variant carries a stable numeric code so that callers can surface
//! backend failures verbatim (code + message) without translating them.

use crate::object::ObjectId;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Errors raised by the versioned backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("No such revision {0}")]
    NoSuchRevision(u64),

    #[error("Path not found: '{0}'")]
    NotFound(String),

    #[error("Path already exists: '{0}'")]
    AlreadyExists(String),

    #[error("'{0}' is not a directory")]
    NotDirectory(String),

    #[error("'{0}' is not a file")]
    NotFile(String),

    #[error("Transaction is out of date: based on r{base}, youngest is r{youngest}")]
    TxnOutOfDate { base: u64, youngest: u64 },

    #[error("Illegal repository URL '{0}'")]
    IllegalUrl(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepoError {
    /// Numeric error code, stable across releases
    pub fn code(&self) -> u32 {
        match self {
            RepoError::NoSuchRevision(_) => 160006,
            RepoError::NotFound(_) => 160013,
            RepoError::NotDirectory(_) => 160016,
            RepoError::NotFile(_) => 160017,
            RepoError::AlreadyExists(_) => 160020,
            RepoError::TxnOutOfDate { .. } => 160028,
            RepoError::ObjectNotFound(_) => 160030,
            RepoError::IllegalUrl(_) => 170000,
            RepoError::Serialization(_) => 200004,
        }
    }
}

impl From<bincode::Error> for RepoError {
    fn from(e: bincode::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            RepoError::NoSuchRevision(1),
            RepoError::NotFound("/a".into()),
            RepoError::AlreadyExists("/a".into()),
            RepoError::NotDirectory("/a".into()),
            RepoError::NotFile("/a".into()),
            RepoError::TxnOutOfDate { base: 1, youngest: 2 },
            RepoError::IllegalUrl("x".into()),
            RepoError::ObjectNotFound(ObjectId::new([0u8; 32])),
            RepoError::Serialization("bad".into()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_message_includes_path() {
        let err = RepoError::NotFound("/trunk/missing".into());
        assert!(err.to_string().contains("/trunk/missing"));
        assert_eq!(err.code(), 160013);
    }
}
