// Remote content service (RCS) seam.
//
// Every read and write of feed data goes through `RemoteContentService`.
// Production uses the HTTP adapter in `http`; tests and the CLI demo mode use
// the in-memory service in `memory`.

pub mod http;
pub mod memory;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use snapfeed_common::types::{
    Cursor, FeedPage, NewPost, Post, PostId, PostUpdate, ProfileUpdate, SaveRecord, SaveRecordId,
    User, UserId,
};
use snapfeed_common::ServiceResult;

pub use http::HttpContentService;
pub use memory::InMemoryContentService;

/// Boxed future returned by every service operation.
pub type RcsFuture<'a, T> = Pin<Box<dyn Future<Output = ServiceResult<T>> + Send + 'a>>;

/// Async document-store operations the client consumes. Any call may fail
/// with a transport, authorization, or not-found error; timeouts are the
/// implementation's concern.
pub trait RemoteContentService: Send + Sync {
    /// Newest-first page of posts after `cursor` (from the start when `None`).
    fn list_feed(&self, cursor: Option<Cursor>, limit: usize) -> RcsFuture<'_, FeedPage>;

    /// Full-text search over captions.
    fn search_posts(&self, term: String) -> RcsFuture<'_, Vec<Post>>;

    fn get_post(&self, id: PostId) -> RcsFuture<'_, Post>;

    /// Replace the full like set of a post. Not a delta.
    fn set_likes(&self, post_id: PostId, liked_by: BTreeSet<UserId>) -> RcsFuture<'_, Post>;

    fn create_save_record(&self, post_id: PostId, user_id: UserId) -> RcsFuture<'_, SaveRecord>;

    fn delete_save_record(&self, record_id: SaveRecordId) -> RcsFuture<'_, ()>;

    /// The signed-in user with embedded save records.
    fn get_current_user(&self) -> RcsFuture<'_, User>;

    fn list_recent_posts(&self, limit: usize) -> RcsFuture<'_, Vec<Post>>;

    fn list_users(&self, limit: usize) -> RcsFuture<'_, Vec<User>>;

    fn get_user(&self, id: UserId) -> RcsFuture<'_, User>;

    fn create_post(&self, post: NewPost) -> RcsFuture<'_, Post>;

    fn update_post(&self, update: PostUpdate) -> RcsFuture<'_, Post>;

    fn delete_post(&self, id: PostId) -> RcsFuture<'_, ()>;

    fn update_user(&self, update: ProfileUpdate) -> RcsFuture<'_, User>;
}

/// Operation names, used for logging and for targeting test hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    ListFeed,
    SearchPosts,
    GetPost,
    SetLikes,
    CreateSaveRecord,
    DeleteSaveRecord,
    GetCurrentUser,
    ListRecentPosts,
    ListUsers,
    GetUser,
    CreatePost,
    UpdatePost,
    DeletePost,
    UpdateUser,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListFeed => "list_feed",
            Self::SearchPosts => "search_posts",
            Self::GetPost => "get_post",
            Self::SetLikes => "set_likes",
            Self::CreateSaveRecord => "create_save_record",
            Self::DeleteSaveRecord => "delete_save_record",
            Self::GetCurrentUser => "get_current_user",
            Self::ListRecentPosts => "list_recent_posts",
            Self::ListUsers => "list_users",
            Self::GetUser => "get_user",
            Self::CreatePost => "create_post",
            Self::UpdatePost => "update_post",
            Self::DeletePost => "delete_post",
            Self::UpdateUser => "update_user",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
