use thiserror::Error;

use gatehouse_core::DomainError;

use crate::{AuthzError, StoreError};

/// Failures surfaced by the authentication engine.
///
/// Messages of `Unauthenticated` and `InvalidCredentials` are fixed so callers
/// cannot tell which internal check rejected them.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Storage(other),
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.detail().to_string())
    }
}
