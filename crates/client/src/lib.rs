// snapfeed-client: client-side synchronization core for the snapfeed feed.
//
// Reads flow through the query cache (pagination, search, entity views);
// writes flow through the mutation coordinator, which invalidates cached
// views according to the invalidation graph once the service confirms.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod mutation;
pub mod pagination;
pub mod rcs;
pub mod search;
pub mod session;

pub use error::ClientError;
pub use session::FeedSession;
