//! Error types for the fleetgrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} conflicts with an existing record: {reason}")]
    Conflict {
        kind: &'static str,
        key: String,
        reason: String,
    },

    #[error("{kind} {key} still contended after {attempts} update attempts")]
    Congestion {
        kind: &'static str,
        key: String,
        attempts: u32,
    },

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Coarse classification of a [`StateError`], used by callers to decide
/// whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Congestion,
    Validation,
    Storage,
}

impl StateError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn conflict(
        kind: &'static str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Congestion { .. } => ErrorKind::Congestion,
            Self::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Storage,
        }
    }

    /// Congestion clears on its own; every other kind needs a different request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Congestion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_congestion_is_retryable() {
        let congestion = StateError::Congestion {
            kind: "worker",
            key: "a/b/g/w".into(),
            attempts: 10,
        };
        assert!(congestion.is_retryable());
        assert!(!StateError::not_found("pool", "a/b").is_retryable());
        assert!(!StateError::conflict("pool", "a/b", "identity differs").is_retryable());
        assert!(!StateError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_record() {
        let err = StateError::not_found("worker", "pp/wt/g/w1");
        assert_eq!(err.to_string(), "worker not found: pp/wt/g/w1");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
