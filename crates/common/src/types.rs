// Core domain types shared across all snapfeed crates.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Document id of a post.
    PostId
);
string_id!(
    /// Document id of a user profile.
    UserId
);
string_id!(
    /// Document id of a save record linking a user to a post.
    SaveRecordId
);
string_id!(
    /// Opaque pagination cursor. Echoed back to the service verbatim, never parsed.
    Cursor
);

impl From<&PostId> for Cursor {
    fn from(id: &PostId) -> Self {
        Self(id.0.clone())
    }
}

/// A post in the feed. Owned by the remote service; local copies are snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub creator_id: UserId,
    pub caption: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub image_ref: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub liked_by: BTreeSet<UserId>,
    /// Save record of the requesting viewer, when the service reports one.
    #[serde(default)]
    pub save_record_id: Option<SaveRecordId>,
}

impl Post {
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }

    pub fn like_count(&self) -> usize {
        self.liked_by.len()
    }
}

/// One page of the feed, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    /// Identity of the last post; pass it back to request the next page.
    pub cursor: Option<Cursor>,
    pub has_more: bool,
}

impl FeedPage {
    pub fn empty() -> Self {
        Self { posts: Vec::new(), cursor: None, has_more: false }
    }

    /// Build a page whose cursor is the id of its last post.
    pub fn from_posts(posts: Vec<Post>, has_more: bool) -> Self {
        let cursor = posts.last().map(|post| Cursor::from(&post.id));
        Self { posts, cursor, has_more }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// True when every post is strictly older than the one before it.
    pub fn is_strictly_descending(&self) -> bool {
        self.posts.windows(2).all(|pair| pair[0].created_at > pair[1].created_at)
    }
}

/// A save record as embedded in the current user document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveRecord {
    pub id: SaveRecordId,
    pub post_id: PostId,
}

/// A user profile. The current user carries its save records and liked posts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub saves: Vec<SaveRecord>,
    #[serde(default)]
    pub liked: Vec<PostId>,
}

impl User {
    pub fn save_record_for(&self, post_id: &PostId) -> Option<&SaveRecord> {
        self.saves.iter().find(|record| &record.post_id == post_id)
    }
}

/// Payload for creating a post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPost {
    pub creator_id: UserId,
    pub caption: String,
    pub image_ref: Option<String>,
    pub location: Option<String>,
    pub tags: BTreeSet<String>,
}

/// Payload for editing a post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostUpdate {
    pub post_id: PostId,
    pub caption: String,
    pub image_ref: Option<String>,
    pub location: Option<String>,
    pub tags: BTreeSet<String>,
}

/// Payload for editing a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub user_id: UserId,
    pub name: String,
    pub bio: String,
    pub image_url: Option<String>,
}

/// Parse a comma-separated tag list: whitespace is removed, empty tags dropped.
pub fn parse_tags(input: &str) -> BTreeSet<String> {
    input
        .split(',')
        .map(|tag| tag.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|tag| !tag.is_empty())
        .collect()
}
