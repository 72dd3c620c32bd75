// Errors surfaced by the client facade.

use snapfeed_common::ServiceError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::mutation::MutationError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A toggle was requested for something not present in the cache.
    #[error("{0} is not loaded; fetch it before toggling")]
    NotLoaded(String),

    /// No current user is known, so viewer-relative actions are impossible.
    #[error("no signed-in user")]
    NoCurrentUser,
}

impl ClientError {
    /// The underlying service failure, if any.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(error) => Some(error),
            Self::Mutation(MutationError::Service(error)) => Some(error),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.service_error().is_some_and(ServiceError::is_unauthorized)
    }
}
