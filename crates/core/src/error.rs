//! Errors raised while constructing domain values.

use thiserror::Error;

/// A value could not be built from caller input.
///
/// Carries no storage or transport detail; those layers map it onto their own
/// error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// The message without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(msg) | Self::InvalidId(msg) => msg,
        }
    }
}
