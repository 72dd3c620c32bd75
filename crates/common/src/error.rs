// Error taxonomy for calls against the remote content service.

use thiserror::Error;

/// Failure of a remote content service call.
///
/// `Clone` so that one failed fetch can be handed to every caller that was
/// coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Transport failure, timeout, or an unreadable response.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The entity was deleted remotely since it was last fetched.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session is missing or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Reserved for write conflicts; no current mutation produces it.
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NetworkFailure(_) => "NETWORK_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Conflict(_) => "CONFLICT",
        }
    }

    /// The one classification the UI must act on: redirect to sign-in.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NetworkFailure(message)
            | Self::NotFound(message)
            | Self::Unauthorized(message)
            | Self::Conflict(message) => message,
        }
    }
}
