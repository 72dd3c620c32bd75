// Consistent exit codes for the snapfeed CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/configuration error
//   11 = authentication error
//   12 = conflict
//   13 = network error
//   14 = not found

use std::process;

use snapfeed_client::config::ConfigError;
use snapfeed_client::mutation::MutationError;
use snapfeed_client::ClientError;
use snapfeed_common::ServiceError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Conflict = 12,
    Network = 13,
    NotFound = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(error) = cause.downcast_ref::<ClientError>() {
                return Self::from_client_error(error);
            }
            if let Some(error) = cause.downcast_ref::<MutationError>() {
                return Self::from_mutation_error(error);
            }
            if let Some(error) = cause.downcast_ref::<ServiceError>() {
                return Self::from_service_code(error.code());
            }
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self::Usage;
            }
        }
        Self::Error
    }

    fn from_client_error(error: &ClientError) -> Self {
        match error {
            ClientError::Service(error) => Self::from_service_code(error.code()),
            ClientError::Mutation(error) => Self::from_mutation_error(error),
            ClientError::Config(_) => Self::Usage,
            ClientError::NoCurrentUser => Self::Auth,
            ClientError::NotLoaded(_) => Self::NotFound,
        }
    }

    fn from_mutation_error(error: &MutationError) -> Self {
        match error {
            MutationError::Service(error) => Self::from_service_code(error.code()),
            MutationError::Cancelled(_) | MutationError::Dropped => Self::Error,
        }
    }

    /// Map a service error code to an exit code.
    pub fn from_service_code(code: &str) -> Self {
        match code {
            "UNAUTHORIZED" => Self::Auth,
            "NETWORK_FAILURE" => Self::Network,
            "NOT_FOUND" => Self::NotFound,
            "CONFLICT" => Self::Conflict,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
