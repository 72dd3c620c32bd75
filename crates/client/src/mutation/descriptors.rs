// Mutation descriptors: a local transform plus a remote-call thunk.
//
// The coordinator is generic over these; like and save are the two optimistic
// kinds built here.

use std::sync::Arc;

use snapfeed_common::types::{PostId, UserId};
use tracing::debug;

use super::patch::{FieldValue, PatchKey, SaveState};
use crate::invalidation::MutationKind;
use crate::rcs::{RcsFuture, RemoteContentService};

/// Pure local change. Applied to the displayed value, and re-applied to the
/// confirmed value when a queued change is promoted.
pub type Transform = Arc<dyn Fn(&FieldValue) -> FieldValue + Send + Sync>;

/// Issues the remote call for a change from `base` (last confirmed) to
/// `proposed`, resolving to the value the service now holds.
pub type RemoteThunk = Box<dyn FnOnce(RemoteInput) -> RcsFuture<'static, FieldValue> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInput {
    pub base: FieldValue,
    pub proposed: FieldValue,
}

/// The cached value a mutation starts from, with the cache revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub value: FieldValue,
    pub revision: u64,
}

pub struct Mutation {
    pub kind: MutationKind,
    pub key: PatchKey,
    pub seed: Seed,
    pub transform: Transform,
    pub remote: RemoteThunk,
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Toggle `viewer` in a post's like set. The service receives the full set.
pub fn like_toggle(
    rcs: Arc<dyn RemoteContentService>,
    post_id: PostId,
    viewer: UserId,
    seed: Seed,
) -> Mutation {
    let transform: Transform = Arc::new(move |current: &FieldValue| match current {
        FieldValue::LikedBy(liked_by) => {
            let mut next = liked_by.clone();
            if !next.remove(&viewer) {
                next.insert(viewer.clone());
            }
            FieldValue::LikedBy(next)
        }
        other => other.clone(),
    });

    let target = post_id.clone();
    let remote: RemoteThunk = Box::new(move |input: RemoteInput| -> RcsFuture<'static, FieldValue> {
        Box::pin(async move {
            let FieldValue::LikedBy(liked_by) = input.proposed else {
                return Ok(input.base);
            };
            let post = rcs.set_likes(target, liked_by).await?;
            Ok(FieldValue::LikedBy(post.liked_by))
        })
    });

    Mutation { kind: MutationKind::Like, key: PatchKey::liked_by(post_id), seed, transform, remote }
}

/// Toggle the viewer's save of a post.
///
/// Saving creates a save record; unsaving deletes the record confirmed by the
/// last successful save. Because at most one change per post is in flight, an
/// unsave issued while the create is pending is queued and runs against the
/// returned record id.
pub fn save_toggle(
    rcs: Arc<dyn RemoteContentService>,
    post_id: PostId,
    viewer: UserId,
    seed: Seed,
) -> Mutation {
    let transform: Transform = Arc::new(|current: &FieldValue| match current {
        FieldValue::Saved(state) if state.is_saved() => FieldValue::Saved(SaveState::NotSaved),
        FieldValue::Saved(_) => FieldValue::Saved(SaveState::Saving),
        other => other.clone(),
    });

    let target = post_id.clone();
    let remote: RemoteThunk = Box::new(move |input: RemoteInput| -> RcsFuture<'static, FieldValue> {
        Box::pin(async move {
            match (&input.base, &input.proposed) {
                (FieldValue::Saved(SaveState::NotSaved), FieldValue::Saved(next))
                    if next.is_saved() =>
                {
                    let record = rcs.create_save_record(target, viewer).await?;
                    Ok(FieldValue::Saved(SaveState::Saved(record.id)))
                }
                (FieldValue::Saved(SaveState::Saved(record_id)), FieldValue::Saved(SaveState::NotSaved)) => {
                    rcs.delete_save_record(record_id.clone()).await?;
                    Ok(FieldValue::Saved(SaveState::NotSaved))
                }
                _ => {
                    debug!(post_id = %target, "save toggle needs no remote call");
                    Ok(input.base.clone())
                }
            }
        })
    });

    Mutation { kind: MutationKind::Save, key: PatchKey::saved(post_id), seed, transform, remote }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcs::memory::InMemoryContentService;
    use snapfeed_common::types::SaveRecordId;

    fn likes(ids: &[&str]) -> FieldValue {
        FieldValue::LikedBy(ids.iter().map(|id| UserId::new(*id)).collect())
    }

    fn rcs() -> Arc<dyn RemoteContentService> {
        Arc::new(InMemoryContentService::demo())
    }

    fn seed(value: FieldValue) -> Seed {
        Seed { value, revision: 0 }
    }

    #[test]
    fn like_transform_toggles_viewer_only() {
        let mutation =
            like_toggle(rcs(), PostId::new("post-01"), UserId::new("me"), seed(likes(&["a"])));
        let liked = (mutation.transform)(&likes(&["a"]));
        assert_eq!(liked, likes(&["a", "me"]));
        assert_eq!((mutation.transform)(&liked), likes(&["a"]));
        assert_eq!(mutation.key, PatchKey::liked_by(PostId::new("post-01")));
    }

    #[test]
    fn save_transform_flips_saved_ness() {
        let mutation = save_toggle(
            rcs(),
            PostId::new("post-01"),
            UserId::new("u-ana"),
            seed(FieldValue::Saved(SaveState::NotSaved)),
        );
        let transform = &mutation.transform;
        assert_eq!(
            transform(&FieldValue::Saved(SaveState::NotSaved)),
            FieldValue::Saved(SaveState::Saving)
        );
        assert_eq!(
            transform(&FieldValue::Saved(SaveState::Saved(SaveRecordId::new("s-1")))),
            FieldValue::Saved(SaveState::NotSaved)
        );
        assert_eq!(
            transform(&FieldValue::Saved(SaveState::Saving)),
            FieldValue::Saved(SaveState::NotSaved)
        );
    }

    #[tokio::test]
    async fn like_remote_sends_full_set() {
        let service = Arc::new(InMemoryContentService::demo());
        let mutation = like_toggle(
            service.clone(),
            PostId::new("post-02"),
            UserId::new("me"),
            seed(likes(&[])),
        );
        let confirmed = (mutation.remote)(RemoteInput { base: likes(&[]), proposed: likes(&["me", "x"]) })
            .await
            .expect("set likes");
        assert_eq!(confirmed, likes(&["me", "x"]));
        let stored = service.post(&PostId::new("post-02")).expect("post");
        assert_eq!(stored.like_count(), 2);
    }

    #[tokio::test]
    async fn save_remote_creates_then_deletes_record() {
        let service = Arc::new(InMemoryContentService::demo());
        let viewer = UserId::new("u-ana");
        let create = save_toggle(
            service.clone(),
            PostId::new("post-03"),
            viewer.clone(),
            seed(FieldValue::Saved(SaveState::NotSaved)),
        );
        let saved = (create.remote)(RemoteInput {
            base: FieldValue::Saved(SaveState::NotSaved),
            proposed: FieldValue::Saved(SaveState::Saving),
        })
        .await
        .expect("create");
        let FieldValue::Saved(SaveState::Saved(record_id)) = saved.clone() else {
            panic!("expected a record id, got {saved:?}");
        };
        assert_eq!(service.save_records_for(&viewer).len(), 1);

        let delete = save_toggle(service.clone(), PostId::new("post-03"), viewer.clone(), seed(saved.clone()));
        let unsaved = (delete.remote)(RemoteInput {
            base: FieldValue::Saved(SaveState::Saved(record_id)),
            proposed: FieldValue::Saved(SaveState::NotSaved),
        })
        .await
        .expect("delete");
        assert_eq!(unsaved, FieldValue::Saved(SaveState::NotSaved));
        assert!(service.save_records_for(&viewer).is_empty());
    }
}
