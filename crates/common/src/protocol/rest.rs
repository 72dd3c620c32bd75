// REST routes, request/response bodies, and error envelope for the content service.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::types::{Post, PostId, SaveRecordId, UserId};

pub const API_PREFIX: &str = "v1";

// ── Routes ─────────────────────────────────────────────────────────

pub const POSTS: &str = "v1/posts";
pub const POSTS_RECENT: &str = "v1/posts/recent";
pub const POSTS_SEARCH: &str = "v1/posts/search";
pub const SAVES: &str = "v1/saves";
pub const USERS: &str = "v1/users";
pub const ACCOUNT_ME: &str = "v1/account/me";

// Routes that carry an id are given as path segments. An id is always one
// segment; the HTTP client percent-encodes it rather than splicing it into a
// path string.

pub fn post_route(id: &PostId) -> Vec<&str> {
    vec![API_PREFIX, "posts", id.as_str()]
}

pub fn post_likes_route(id: &PostId) -> Vec<&str> {
    vec![API_PREFIX, "posts", id.as_str(), "likes"]
}

pub fn save_route(id: &SaveRecordId) -> Vec<&str> {
    vec![API_PREFIX, "saves", id.as_str()]
}

pub fn user_route(id: &UserId) -> Vec<&str> {
    vec![API_PREFIX, "users", id.as_str()]
}

// ── Bodies ─────────────────────────────────────────────────────────

/// List response: documents in server order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentList<T> {
    pub documents: Vec<T>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Full replacement of a post's like set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetLikesBody {
    pub liked_by: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSaveBody {
    pub post_id: PostId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedSave {
    pub record_id: SaveRecordId,
}

pub type PostList = DocumentList<Post>;

// ── Error envelope ─────────────────────────────────────────────────

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

/// Map an HTTP status (and optional error envelope) onto the error taxonomy.
///
/// The envelope code wins when it names an auth or not-found condition, since
/// some gateways answer auth failures with 403 or 400.
pub fn error_for_status(status: u16, envelope: Option<&ErrorEnvelope>) -> ServiceError {
    let message = envelope
        .map(|envelope| envelope.error.message.clone())
        .unwrap_or_else(|| format!("service responded with status {status}"));

    if let Some(code) = envelope.map(|envelope| envelope.error.code.as_str()) {
        match code {
            "AUTH_INVALID_TOKEN" | "AUTH_TOKEN_REVOKED" | "AUTH_FORBIDDEN"
            | "SESSION_EXPIRED" | "UNAUTHORIZED" => return ServiceError::Unauthorized(message),
            "NOT_FOUND" | "DOCUMENT_NOT_FOUND" => return ServiceError::NotFound(message),
            "CONFLICT" | "DOCUMENT_ALREADY_EXISTS" => return ServiceError::Conflict(message),
            _ => {}
        }
    }

    match status {
        401 | 403 => ServiceError::Unauthorized(message),
        404 | 410 => ServiceError::NotFound(message),
        409 | 412 => ServiceError::Conflict(message),
        _ => ServiceError::NetworkFailure(message),
    }
}
