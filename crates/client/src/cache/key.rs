// Cache keys and key patterns.
//
// Keys render as `post:{id}`, `feed:start`, `feed:{cursor}`, `feed:recent`,
// `search:{term}`, `currentUser`, `users`, `user:{id}`.

use std::fmt;

use snapfeed_common::types::{Cursor, PostId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Post(PostId),
    /// One page of the primary feed, keyed by the cursor that requested it.
    FeedPage { cursor: Option<Cursor> },
    RecentPosts,
    Search(String),
    CurrentUser,
    Users,
    User(UserId),
}

impl CacheKey {
    pub fn feed_page(cursor: Option<&Cursor>) -> Self {
        Self::FeedPage { cursor: cursor.cloned() }
    }

    pub fn is_feed(&self) -> bool {
        matches!(self, Self::FeedPage { .. } | Self::RecentPosts)
    }

    pub fn is_search(&self) -> bool {
        matches!(self, Self::Search(_))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(id) => write!(f, "post:{id}"),
            Self::FeedPage { cursor: None } => f.write_str("feed:start"),
            Self::FeedPage { cursor: Some(cursor) } => write!(f, "feed:{cursor}"),
            Self::RecentPosts => f.write_str("feed:recent"),
            Self::Search(term) => write!(f, "search:{term}"),
            Self::CurrentUser => f.write_str("currentUser"),
            Self::Users => f.write_str("users"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A predicate over cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(CacheKey),
    /// `feed:*`: every feed page plus the recent-posts list.
    AllFeed,
    /// `search:*`
    AllSearch,
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::AllFeed => key.is_feed(),
            Self::AllSearch => key.is_search(),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => key.fmt(f),
            Self::AllFeed => f.write_str("feed:*"),
            Self::AllSearch => f.write_str("search:*"),
        }
    }
}
