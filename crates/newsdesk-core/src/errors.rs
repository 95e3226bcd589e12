//! Error taxonomy shared by every layer of the engine.
//!
//! Variant names follow the error kinds of the acquisition/retrieval design
//! rather than Rust convention (`NotFound` instead of `DocumentNotFound`),
//! since each variant maps 1:1 onto an HTTP status at the server boundary.

use thiserror::Error;

/// A domain-level error. Carries enough context to format both a log line
/// and an HTTP `{code, message, details?}` body without re-deriving either.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("user {user_id} may not access resource owned by another user")]
    CrossUserForbidden { user_id: String },

    #[error("duplicate: {message}")]
    Duplicate { message: String },

    #[error("dependency unavailable: {message}")]
    Dependency { message: String },

    #[error("storage failure: {message}")]
    Storage { message: String },

    #[error("backpressure: {message}")]
    Backpressure { message: String },

    #[error("corrupt state: {message}")]
    Corrupt { message: String },

    #[error("timed out: {message}")]
    Timeout { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::Duplicate { message: message.into() }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::Backpressure { message: message.into() }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt { message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    /// Stable short code used in the JSON error body and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation",
            CoreError::NotFound { .. } => "not_found",
            CoreError::CrossUserForbidden { .. } => "cross_user_forbidden",
            CoreError::Duplicate { .. } => "duplicate",
            CoreError::Dependency { .. } => "dependency",
            CoreError::Storage { .. } => "storage",
            CoreError::Backpressure { .. } => "backpressure",
            CoreError::Corrupt { .. } => "corrupt",
            CoreError::Timeout { .. } => "timeout",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
