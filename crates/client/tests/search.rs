// Debounced search through the session: supersession and feed interplay.

use std::sync::Arc;
use std::time::Duration;

use snapfeed_client::cache::CacheKey;
use snapfeed_client::config::ClientConfig;
use snapfeed_client::rcs::{InMemoryContentService, Operation};
use snapfeed_client::search::{SearchEvent, SearchStatus};
use snapfeed_client::FeedSession;
use snapfeed_common::types::Post;
use tokio::sync::broadcast;

async fn session() -> (Arc<InMemoryContentService>, FeedSession) {
    let service = Arc::new(InMemoryContentService::demo());
    let session = FeedSession::connect(service.clone(), &ClientConfig::default())
        .await
        .expect("connect");
    (service, session)
}

async fn results_for(events: &mut broadcast::Receiver<SearchEvent>, generation: u64) -> Vec<Post> {
    loop {
        match events.recv().await.expect("event") {
            SearchEvent::Results { session, posts } if session.generation == generation => {
                return posts;
            }
            SearchEvent::Failed { error, .. } => panic!("search failed: {error}"),
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn late_result_of_older_generation_is_discarded() {
    let (service, session) = session().await;
    let mut events = session.subscribe_search();
    let slow = service.hold_matching(Operation::SearchPosts, "food");

    session.use_search("food");
    slow.arrived().await;
    assert_eq!(session.search_view().generation, 1);

    session.use_search("cat");
    let cats = results_for(&mut events, 2).await;
    assert!(!cats.is_empty());

    slow.release();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cache = session.cache();
    assert!(cache.peek::<Vec<Post>>(&CacheKey::Search("food".into())).is_none());
    assert_eq!(cache.peek::<Vec<Post>>(&CacheKey::Search("cat".into())), Some(cats.clone()));

    let view = session.search_view();
    assert_eq!(view.term, "cat");
    assert_eq!(view.generation, 2);
    assert_eq!(view.status, SearchStatus::Ready);
    assert_eq!(view.posts, Some(cats));
    assert_eq!(service.calls(Operation::SearchPosts), 2);
}

#[tokio::test(start_paused = true)]
async fn one_call_per_generation() {
    let (service, session) = session().await;
    let mut events = session.subscribe_search();

    for term in ["c", "ca", "cat"] {
        session.use_search(term);
        tokio::time::sleep(Duration::from_millis(120)).await;
    }
    // Re-rendering with an unchanged term is not new input.
    session.use_search("cat");
    results_for(&mut events, 1).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(service.calls(Operation::SearchPosts), 1);
    assert_eq!(service.call_log().last().and_then(|call| call.argument.clone()), Some("cat".into()));
}

#[tokio::test(start_paused = true)]
async fn clearing_the_term_reinstates_the_feed() {
    let (_service, session) = session().await;
    let mut events = session.subscribe_search();
    session.load_more().await.expect("page");

    let view = session.use_search("food");
    assert!(view.is_searching());
    assert!(session.use_feed().suspended);
    assert_eq!(
        session.load_more().await.expect("suspended"),
        snapfeed_client::pagination::LoadOutcome::Suspended
    );
    results_for(&mut events, 1).await;

    let cleared = session.use_search("");
    assert!(!cleared.is_active());
    assert_eq!(cleared.status, SearchStatus::Idle);
    assert!(cleared.posts.is_none());

    let feed = session.use_feed();
    assert!(!feed.suspended);
    assert_eq!(feed.posts.len(), 10);
    assert!(matches!(
        session.load_more().await.expect("resumed"),
        snapfeed_client::pagination::LoadOutcome::Loaded { added: 10 }
    ));
}

#[tokio::test(start_paused = true)]
async fn liking_a_result_marks_search_stale_and_revalidation_reissues_it() {
    let (service, session) = session().await;
    let mut events = session.subscribe_search();

    session.use_search("cat");
    let posts = results_for(&mut events, 1).await;
    let post_id = posts[0].id.clone();

    session.toggle_like(&post_id).expect("like").settled().await.expect("liked");
    assert!(session.cache().is_stale(&CacheKey::Search("cat".into())));
    assert!(session.search_view().posts.expect("stale results still shown")[0].is_liked_by(
        &snapfeed_common::types::UserId::new("u-ana")
    ));

    session.revalidate().await.expect("revalidate");
    let refreshed = results_for(&mut events, 2).await;
    assert!(refreshed[0].is_liked_by(&snapfeed_common::types::UserId::new("u-ana")));
    assert_eq!(service.calls(Operation::SearchPosts), 2);
}

#[tokio::test(start_paused = true)]
async fn search_answered_before_a_like_commits_does_not_revert_it() {
    let (service, session) = session().await;
    let mut events = session.subscribe_search();
    session.load_more().await.expect("page");
    let post_id = snapfeed_common::types::PostId::new("post-25");
    let viewer = snapfeed_common::types::UserId::new("u-ana");

    let reply = service.hold_reply(Operation::SearchPosts);
    session.use_search("#25");
    reply.arrived().await;

    session.toggle_like(&post_id).expect("like").settled().await.expect("liked");
    assert!(session.use_like_toggle(&post_id).expect("view").liked);

    reply.release();
    let answered = results_for(&mut events, 1).await;
    assert!(!answered[0].is_liked_by(&viewer));

    assert!(session.cache().is_stale(&CacheKey::Search("#25".into())));
    assert!(session.use_like_toggle(&post_id).expect("view").liked);
    let shown = session.search_view().posts.expect("results shown");
    assert!(shown[0].is_liked_by(&viewer));
    assert!(service.post(&post_id).expect("post").is_liked_by(&viewer));
}
