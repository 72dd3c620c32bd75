// Optimistic like/save behaviour through the session facade.

use std::collections::BTreeSet;
use std::sync::Arc;

use snapfeed_client::config::ClientConfig;
use snapfeed_client::mutation::{FieldValue, MutationError, SaveState};
use snapfeed_client::rcs::{InMemoryContentService, Operation};
use snapfeed_client::{ClientError, FeedSession};
use snapfeed_common::types::{PostId, UserId};
use snapfeed_common::ServiceError;

async fn session() -> (Arc<InMemoryContentService>, FeedSession) {
    let service = Arc::new(InMemoryContentService::demo());
    let session = FeedSession::connect(service.clone(), &ClientConfig::default())
        .await
        .expect("connect");
    session.load_more().await.expect("first page");
    (service, session)
}

fn viewer() -> UserId {
    UserId::new("u-ana")
}

// ── Likes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn inverse_toggles_while_pending_settle_to_no_change() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-25");
    let gate = service.hold(Operation::SetLikes);

    let like = session.toggle_like(&post_id).expect("like");
    gate.arrived().await;
    let unlike = session.toggle_like(&post_id).expect("unlike");
    assert!(!session.use_like_toggle(&post_id).expect("view").liked);

    gate.release();
    like.settled().await.expect("like settles");
    unlike.settled().await.expect("unlike settles");

    let view = session.use_like_toggle(&post_id).expect("view");
    assert!(!view.liked);
    assert!(!view.is_pending);
    assert!(service.post(&post_id).expect("post").liked_by.is_empty());
}

#[tokio::test]
async fn failed_like_shows_viewer_then_reverts() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-24");
    let gate = service.hold(Operation::SetLikes);
    service.fail_next(Operation::SetLikes, ServiceError::network("timeout"));

    let ticket = session.toggle_like(&post_id).expect("like");
    let shown = session.use_like_toggle(&post_id).expect("view");
    assert!(shown.liked);
    assert!(shown.is_pending);
    assert!(shown.liked_by.contains(&viewer()));

    gate.arrived().await;
    gate.release();
    let error = ticket.settled().await.expect_err("injected");
    assert_eq!(error, MutationError::Service(ServiceError::network("timeout")));

    let reverted = session.use_like_toggle(&post_id).expect("view");
    assert!(!reverted.liked);
    assert!(!reverted.is_pending);
    assert_eq!(reverted.error, Some(ServiceError::network("timeout")));
}

#[tokio::test]
async fn rollback_restores_like_set_exactly() {
    let service = Arc::new(InMemoryContentService::demo());
    let post_id = PostId::new("post-23");
    let others: BTreeSet<UserId> = [UserId::new("u-ben"), UserId::new("u-chloe")].into_iter().collect();
    let mut seeded = service.post(&post_id).expect("post");
    seeded.liked_by = others.clone();
    service.insert_post(seeded);

    let session = FeedSession::connect(service.clone(), &ClientConfig::default())
        .await
        .expect("connect");
    session.load_more().await.expect("page");
    let before = session.use_like_toggle(&post_id).expect("view").liked_by;
    assert_eq!(before, others);

    service.fail_next(Operation::SetLikes, ServiceError::network("dropped"));
    let ticket = session.toggle_like(&post_id).expect("like");
    assert_eq!(
        ticket.optimistic_value(),
        &FieldValue::LikedBy(others.iter().cloned().chain([viewer()]).collect())
    );
    ticket.settled().await.expect_err("injected");

    assert_eq!(session.use_like_toggle(&post_id).expect("view").liked_by, before);
    let feed = session.use_feed();
    let post = feed.posts.iter().find(|post| post.id == post_id).expect("in feed");
    assert_eq!(post.liked_by, before);
}

#[tokio::test]
async fn toggle_after_settle_is_independent() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-22");

    session.toggle_like(&post_id).expect("like").settled().await.expect("liked");
    session.toggle_like(&post_id).expect("unlike").settled().await.expect("unliked");

    assert_eq!(service.calls(Operation::SetLikes), 2);
    assert!(!session.use_like_toggle(&post_id).expect("view").liked);
}

// ── Saves ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unsave_before_record_returns_leaves_no_orphan() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-21");
    let gate = service.hold(Operation::CreateSaveRecord);

    let save = session.toggle_save(&post_id).expect("save");
    assert_eq!(save.optimistic_value(), &FieldValue::Saved(SaveState::Saving));
    gate.arrived().await;

    let unsave = session.toggle_save(&post_id).expect("unsave");
    assert!(!session.use_save_toggle(&post_id).expect("view").saved);
    assert_eq!(service.calls(Operation::DeleteSaveRecord), 0);

    gate.release();
    let saved = save.settled().await.expect("create settles");
    assert!(matches!(saved, FieldValue::Saved(SaveState::Saved(_))));
    assert_eq!(unsave.settled().await.expect("delete settles"), FieldValue::Saved(SaveState::NotSaved));

    assert!(service.save_records_for(&viewer()).is_empty());
    assert_eq!(service.calls(Operation::CreateSaveRecord), 1);
    assert_eq!(service.calls(Operation::DeleteSaveRecord), 1);
    let view = session.use_save_toggle(&post_id).expect("view");
    assert!(!view.saved);
    assert!(!view.is_pending);
}

#[tokio::test]
async fn failed_create_cancels_queued_unsave() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-20");
    let gate = service.hold(Operation::CreateSaveRecord);
    service.fail_next(Operation::CreateSaveRecord, ServiceError::network("timeout"));

    let save = session.toggle_save(&post_id).expect("save");
    gate.arrived().await;
    let unsave = session.toggle_save(&post_id).expect("unsave");
    gate.release();

    save.settled().await.expect_err("create fails");
    let cancelled = unsave.settled().await.expect_err("unsave dropped");
    assert!(matches!(cancelled, MutationError::Cancelled(_)));

    assert!(service.save_records_for(&viewer()).is_empty());
    assert_eq!(service.calls(Operation::DeleteSaveRecord), 0);
    assert!(!session.use_save_toggle(&post_id).expect("view").saved);
}

// ── Authorization ──────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_mutation_expires_session() {
    let (service, session) = session().await;
    let post_id = PostId::new("post-19");
    let mut auth = session.subscribe_auth();
    service.expire_session();

    let error = session.toggle_like(&post_id).expect("like").settled().await.expect_err("rejected");
    let error = ClientError::from(error);
    assert!(error.is_unauthorized());

    auth.changed().await.expect("auth change");
    assert!(auth.borrow().is_expired());
    assert!(!session.use_like_toggle(&post_id).expect("view").liked);
}
