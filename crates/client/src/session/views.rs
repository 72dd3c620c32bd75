// Snapshots handed to the UI layer. Each one carries the displayed value
// (cached, with any optimistic change applied) plus pending/error flags.

use std::collections::BTreeSet;

use serde::Serialize;
use snapfeed_common::types::{Post, PostId, UserId};
use snapfeed_common::ServiceError;

use crate::mutation::{FieldView, SaveState};
use crate::pagination::PageStatus;
use crate::search::SearchStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub posts: Vec<Post>,
    pub status: PageStatus,
    pub has_more: bool,
    /// A search term is active, so the feed is hidden and not paginating.
    pub suspended: bool,
}

impl FeedView {
    pub fn is_fetching(&self) -> bool {
        self.status == PageStatus::Fetching
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match &self.status {
            PageStatus::Failed(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchView {
    pub term: String,
    pub generation: u64,
    pub status: SearchStatus,
    /// Results of the latest emitted search; `None` before the first one lands.
    pub posts: Option<Vec<Post>>,
}

impl SearchView {
    pub fn is_active(&self) -> bool {
        !self.term.is_empty()
    }

    pub fn is_searching(&self) -> bool {
        matches!(self.status, SearchStatus::Debouncing | SearchStatus::Searching)
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match &self.status {
            SearchStatus::Failed(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeToggle {
    pub post_id: PostId,
    pub liked: bool,
    pub like_count: usize,
    pub liked_by: BTreeSet<UserId>,
    pub is_pending: bool,
    #[serde(skip)]
    pub error: Option<ServiceError>,
}

impl LikeToggle {
    pub(crate) fn from_field(post_id: PostId, viewer: Option<&UserId>, field: FieldView) -> Self {
        let liked_by = field.value.liked_by().cloned().unwrap_or_default();
        Self {
            post_id,
            liked: viewer.is_some_and(|viewer| liked_by.contains(viewer)),
            like_count: liked_by.len(),
            liked_by,
            is_pending: field.pending,
            error: field.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveToggle {
    pub post_id: PostId,
    pub saved: bool,
    pub is_pending: bool,
    #[serde(skip)]
    pub error: Option<ServiceError>,
}

impl SaveToggle {
    pub(crate) fn from_field(post_id: PostId, field: FieldView) -> Self {
        Self {
            post_id,
            saved: field.value.save_state().is_some_and(SaveState::is_saved),
            is_pending: field.pending,
            error: field.error,
        }
    }
}
