// snapfeed-common: shared types and wire protocol for the snapfeed workspace

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ServiceError, ServiceResult};
