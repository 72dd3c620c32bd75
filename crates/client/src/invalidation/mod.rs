// Invalidation graph: which cached views a successful mutation makes stale.
//
// The standard graph is total by construction (an exhaustive match); custom
// graphs go through `InvalidationGraphBuilder::build`, which rejects any
// mutation kind left unmapped.

use std::collections::HashMap;
use std::fmt;

use snapfeed_common::types::{PostId, UserId};
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheKey, KeyPattern, QueryCache};

// ── Mutation kinds ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Save,
    CreatePost,
    UpdatePost,
    DeletePost,
    UpdateUser,
}

impl MutationKind {
    pub const ALL: [MutationKind; 6] = [
        Self::Like,
        Self::Save,
        Self::CreatePost,
        Self::UpdatePost,
        Self::DeletePost,
        Self::UpdateUser,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Save => "save",
            Self::CreatePost => "createPost",
            Self::UpdatePost => "updatePost",
            Self::DeletePost => "deletePost",
            Self::UpdateUser => "updateUser",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Rules ──────────────────────────────────────────────────────────

/// A key predicate, possibly parameterized by the mutation's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// `post:{id}` of the mutated post.
    PostById,
    /// `feed:*`
    AllFeed,
    /// `search:*`
    AllSearch,
    /// `currentUser`
    CurrentUser,
    /// `user:{id}` of the mutated user.
    UserById,
    /// `users`
    Users,
}

/// What a mutation acted on; fills in parameterized rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationTarget {
    pub post_id: Option<PostId>,
    pub user_id: Option<UserId>,
}

impl MutationTarget {
    pub fn post(id: PostId) -> Self {
        Self { post_id: Some(id), user_id: None }
    }

    pub fn user(id: UserId) -> Self {
        Self { post_id: None, user_id: Some(id) }
    }
}

impl KeyRule {
    fn resolve(self, target: &MutationTarget) -> Option<KeyPattern> {
        match self {
            Self::PostById => {
                target.post_id.clone().map(|id| KeyPattern::Exact(CacheKey::Post(id)))
            }
            Self::AllFeed => Some(KeyPattern::AllFeed),
            Self::AllSearch => Some(KeyPattern::AllSearch),
            Self::CurrentUser => Some(KeyPattern::Exact(CacheKey::CurrentUser)),
            Self::UserById => {
                target.user_id.clone().map(|id| KeyPattern::Exact(CacheKey::User(id)))
            }
            Self::Users => Some(KeyPattern::Exact(CacheKey::Users)),
        }
    }
}

fn standard_rules(kind: MutationKind) -> &'static [KeyRule] {
    use KeyRule::*;
    match kind {
        MutationKind::Like => &[PostById, AllFeed, AllSearch, CurrentUser],
        MutationKind::Save => &[AllFeed, CurrentUser],
        MutationKind::CreatePost => &[AllFeed],
        MutationKind::UpdatePost => &[PostById],
        MutationKind::DeletePost => &[AllFeed, PostById],
        MutationKind::UpdateUser => &[CurrentUser, UserById],
    }
}

// ── Graph ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("mutation kind `{0}` has no invalidation rules")]
    Unmapped(MutationKind),
    #[error("rule {rule:?} for `{kind}` needs a target the mutation did not provide")]
    MissingTarget { kind: MutationKind, rule: KeyRule },
}

#[derive(Debug, Clone)]
pub struct InvalidationGraph {
    rules: HashMap<MutationKind, Vec<KeyRule>>,
}

impl Default for InvalidationGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl InvalidationGraph {
    pub fn standard() -> Self {
        let rules = MutationKind::ALL
            .iter()
            .map(|kind| (*kind, standard_rules(*kind).to_vec()))
            .collect();
        Self { rules }
    }

    pub fn builder() -> InvalidationGraphBuilder {
        InvalidationGraphBuilder::default()
    }

    pub fn rules(&self, kind: MutationKind) -> Result<&[KeyRule], InvalidationError> {
        self.rules.get(&kind).map(Vec::as_slice).ok_or(InvalidationError::Unmapped(kind))
    }

    /// Key patterns made stale when `kind` succeeds on `target`.
    pub fn patterns(
        &self,
        kind: MutationKind,
        target: &MutationTarget,
    ) -> Result<Vec<KeyPattern>, InvalidationError> {
        self.rules(kind)?
            .iter()
            .map(|rule| {
                rule.resolve(target).ok_or(InvalidationError::MissingTarget { kind, rule: *rule })
            })
            .collect()
    }

    /// Mark every dependent key stale. Returns the keys touched.
    pub fn apply(
        &self,
        cache: &QueryCache,
        kind: MutationKind,
        target: &MutationTarget,
    ) -> Result<Vec<CacheKey>, InvalidationError> {
        let patterns = self.patterns(kind, target)?;
        let touched = cache.invalidate_matching(|key| patterns.iter().any(|p| p.matches(key)));
        debug!(kind = %kind, touched = touched.len(), "invalidated dependent views");
        Ok(touched)
    }
}

#[derive(Debug, Default)]
pub struct InvalidationGraphBuilder {
    rules: HashMap<MutationKind, Vec<KeyRule>>,
}

impl InvalidationGraphBuilder {
    pub fn map(mut self, kind: MutationKind, rules: impl IntoIterator<Item = KeyRule>) -> Self {
        self.rules.entry(kind).or_default().extend(rules);
        self
    }

    /// Fails on the first kind without rules. An empty rule list counts as
    /// mapped: the kind explicitly invalidates nothing.
    pub fn build(self) -> Result<InvalidationGraph, InvalidationError> {
        if let Some(missing) = MutationKind::ALL.iter().find(|kind| !self.rules.contains_key(*kind)) {
            return Err(InvalidationError::Unmapped(*missing));
        }
        Ok(InvalidationGraph { rules: self.rules })
    }
}
