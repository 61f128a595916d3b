//! Errors returned to API callers.

use thiserror::Error;

use fleetgrid_state::{ErrorKind, StateError};

pub type ApiResult<T> = Result<T, ApiError>;

/// What went wrong, in terms a caller can act on.
///
/// Only [`ApiError::Congestion`] is worth an immediate retry.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Congestion(String),

    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ResourceNotFound",
            Self::Conflict(_) => "RequestConflict",
            Self::Congestion(_) => "Congestion",
            Self::Validation(_) => "InputError",
            Self::Internal(_) => "InternalServerError",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Congestion(_))
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        let message = e.to_string();
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Congestion => Self::Congestion(message),
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Storage => Self::Internal(message),
        }
    }
}
