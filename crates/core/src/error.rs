//! Error types shared across the system

use thiserror::Error;

/// Base error type for the entire system.
///
/// The variants follow the propagation policy: `Transient` is retried
/// locally, `Conflict` and `Validation` bubble to the phase boundary,
/// `Processing` stays at the message boundary, and `Timeout` is kept
/// distinct from `Transient` so callers can escalate instead of retrying.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("validation error at {path}: {reason}")]
    Validation { path: String, reason: String },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("observed state conflicts with desired state: {0}")]
    Conflict(String),

    #[error("deadline elapsed: {0}")]
    Timeout(String),

    #[error("message processing failed: {0}")]
    Processing(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may sensibly retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
