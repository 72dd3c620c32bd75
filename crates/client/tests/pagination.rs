// Feed pagination against the in-memory content service.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use snapfeed_client::cache::QueryCache;
use snapfeed_client::pagination::{FeedPaginator, LoadOutcome, PageStatus};
use snapfeed_client::rcs::memory::{demo_posts, demo_users};
use snapfeed_client::rcs::{InMemoryContentService, Operation, RemoteContentService};
use snapfeed_common::types::{Cursor, FeedPage};
use snapfeed_common::ServiceError;

fn service_with(count: usize) -> Arc<InMemoryContentService> {
    let users = demo_users();
    let service = InMemoryContentService::new(users[0].clone());
    for user in users.iter().skip(1) {
        service.insert_user(user.clone());
    }
    for post in demo_posts(&users, count) {
        service.insert_post(post);
    }
    Arc::new(service)
}

// ── Fixed scenario ─────────────────────────────────────────────────

#[tokio::test]
async fn twenty_five_posts_in_pages_of_ten() {
    let service = service_with(25);

    let first = service.list_feed(None, 10).await.expect("page 1");
    let second = service.list_feed(first.cursor.clone(), 10).await.expect("page 2");
    let third = service.list_feed(second.cursor.clone(), 10).await.expect("page 3");

    assert_eq!((first.len(), second.len(), third.len()), (10, 10, 5));
    // Cursors are the ids of the 10th and 20th posts, newest first.
    assert_eq!(first.cursor, Some(Cursor::new("post-16")));
    assert_eq!(second.cursor, Some(Cursor::new("post-06")));
    assert!(first.has_more);
    assert!(second.has_more);
    assert!(!third.has_more);
}

#[tokio::test]
async fn paginator_stops_after_the_short_page() {
    let service = service_with(25);
    let pager = FeedPaginator::new(QueryCache::new(), service.clone(), 10);

    let mut sizes = Vec::new();
    loop {
        match pager.load_next().await.expect("load") {
            LoadOutcome::Loaded { added } => sizes.push(added),
            LoadOutcome::Exhausted => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(pager.status(), PageStatus::Exhausted);
    assert!(!pager.pages().last().expect("last page").has_more);
    assert_eq!(service.calls(Operation::ListFeed), 3);
}

// ── Idempotence ────────────────────────────────────────────────────

#[tokio::test]
async fn refetching_a_used_cursor_returns_the_same_page() {
    let service = service_with(25);
    let first = service.list_feed(None, 10).await.expect("page 1");

    let once = service.list_feed(first.cursor.clone(), 10).await.expect("page 2");
    let again = service.list_feed(first.cursor.clone(), 10).await.expect("page 2 again");
    assert_eq!(once, again);
}

#[tokio::test]
async fn retry_after_failure_fetches_the_same_page() {
    let service = service_with(25);
    let pager = FeedPaginator::new(QueryCache::new(), service.clone(), 10);
    pager.load_next().await.expect("page 1");

    service.fail_next(Operation::ListFeed, ServiceError::network("connection reset"));
    pager.load_next().await.expect_err("injected failure");
    let before: Vec<_> = pager.items().iter().map(|post| post.id.clone()).collect();
    assert_eq!(before.len(), 10);

    pager.load_next().await.expect("retry");
    let ids: Vec<_> = pager.items().iter().map(|post| post.id.to_string()).collect();
    assert_eq!(ids.len(), 20);
    assert_eq!(ids[10], "post-15");
    assert_eq!(ids[19], "post-06");
}

// ── Ordering property ──────────────────────────────────────────────

fn collect_pages(count: usize, page_size: usize) -> Vec<FeedPage> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let service = service_with(count);
        let pager = FeedPaginator::new(QueryCache::new(), service, page_size);
        while let LoadOutcome::Loaded { .. } = pager.load_next().await.expect("load") {}
        pager.pages()
    })
}

proptest! {
    #[test]
    fn concatenated_pages_are_unique_and_descending(count in 0usize..60, page_size in 1usize..15) {
        let pages = collect_pages(count, page_size);
        let posts: Vec<_> = pages.iter().flat_map(|page| page.posts.iter()).collect();

        prop_assert_eq!(posts.len(), count);
        let ids: HashSet<_> = posts.iter().map(|post| &post.id).collect();
        prop_assert_eq!(ids.len(), posts.len());
        prop_assert!(posts.windows(2).all(|pair| pair[0].created_at > pair[1].created_at));
        prop_assert!(pages.iter().all(|page| page.len() <= page_size));
    }
}
