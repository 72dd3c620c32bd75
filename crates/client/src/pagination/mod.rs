// Forward-only cursor pagination over the primary feed.
//
// State machine: Idle -> Fetching -> {Idle, Exhausted, Failed}. A page is
// requested only when the consumer signals proximity to the end of what is
// loaded (`load_next`); the paginator never polls. A failed fetch keeps the
// cursor so a retry asks for the same page again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snapfeed_common::types::{Cursor, FeedPage, Post, PostId};
use snapfeed_common::ServiceResult;
use tracing::{debug, warn};

use crate::cache::{CacheKey, QueryCache};
use crate::rcs::RemoteContentService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    Idle,
    Fetching,
    /// The service has no more pages; no further fetches are issued.
    Exhausted,
    /// The last fetch failed; `load_next` retries with the same cursor.
    Failed(snapfeed_common::ServiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { added: usize },
    Exhausted,
    /// A fetch is already running; this signal was ignored.
    AlreadyFetching,
    /// A search is active; the feed does not paginate.
    Suspended,
    /// The feed was reset while the fetch ran; its page was dropped.
    Discarded,
}

struct LoadedPage {
    request: Option<Cursor>,
    page: FeedPage,
}

struct PagerState {
    status: PageStatus,
    cursor: Option<Cursor>,
    pages: Vec<LoadedPage>,
    used_cursors: HashSet<Cursor>,
    suspended: bool,
    epoch: u64,
}

impl Default for PagerState {
    fn default() -> Self {
        Self {
            status: PageStatus::Idle,
            cursor: None,
            pages: Vec::new(),
            used_cursors: HashSet::new(),
            suspended: false,
            epoch: 0,
        }
    }
}

/// Puts the previous status back if a fetch is dropped before it settles,
/// so an abandoned `load_next` cannot leave the feed stuck in `Fetching`.
struct FetchGuard<'a> {
    pager: &'a FeedPaginator,
    epoch: u64,
    previous: Option<PageStatus>,
}

impl<'a> FetchGuard<'a> {
    fn new(pager: &'a FeedPaginator, epoch: u64, previous: PageStatus) -> Self {
        Self { pager, epoch, previous: Some(previous) }
    }

    /// The fetch completed; the caller sets the status itself.
    fn disarm(mut self) {
        self.previous = None;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let mut state = self.pager.lock();
        if state.epoch == self.epoch && state.status == PageStatus::Fetching {
            debug!(status = ?previous, "feed fetch abandoned; status restored");
            state.status = previous;
        }
    }
}

pub struct FeedPaginator {
    cache: QueryCache,
    rcs: Arc<dyn RemoteContentService>,
    page_size: usize,
    state: Mutex<PagerState>,
}

impl FeedPaginator {
    pub fn new(cache: QueryCache, rcs: Arc<dyn RemoteContentService>, page_size: usize) -> Self {
        Self { cache, rcs, page_size: page_size.max(1), state: Mutex::new(PagerState::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, PagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn status(&self) -> PageStatus {
        self.lock().status.clone()
    }

    /// Cursor the next fetch will send (`None` before the first page).
    pub fn cursor(&self) -> Option<Cursor> {
        self.lock().cursor.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().status != PageStatus::Exhausted
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    /// Suspend or resume pagination (while a search term is active).
    pub fn set_suspended(&self, suspended: bool) {
        let mut state = self.lock();
        if state.suspended != suspended {
            debug!(suspended, "feed pagination suspension changed");
        }
        state.suspended = suspended;
    }

    pub fn pages(&self) -> Vec<FeedPage> {
        self.lock().pages.iter().map(|loaded| loaded.page.clone()).collect()
    }

    /// Every loaded post in feed order, each id at most once.
    pub fn items(&self) -> Vec<Post> {
        let state = self.lock();
        let mut seen: HashSet<&PostId> = HashSet::new();
        state
            .pages
            .iter()
            .flat_map(|loaded| loaded.page.posts.iter())
            .filter(|post| seen.insert(&post.id))
            .cloned()
            .collect()
    }

    /// Drop all loaded pages and start over from the first page.
    pub fn reset(&self) {
        let mut state = self.lock();
        let suspended = state.suspended;
        let epoch = state.epoch + 1;
        *state = PagerState { suspended, epoch, ..PagerState::default() };
        debug!(epoch, "feed pagination reset");
    }

    async fn fetch_page(&self, cursor: Option<Cursor>) -> ServiceResult<FeedPage> {
        let rcs = Arc::clone(&self.rcs);
        let limit = self.page_size;
        let key = CacheKey::feed_page(cursor.as_ref());
        self.cache
            .read(key, move || async move { rcs.list_feed(cursor, limit).await })
            .await
    }

    /// Proximity signal from the consumer: fetch the next page if allowed.
    pub async fn load_next(&self) -> ServiceResult<LoadOutcome> {
        let (cursor, guard) = {
            let mut state = self.lock();
            if state.suspended {
                return Ok(LoadOutcome::Suspended);
            }
            match state.status {
                PageStatus::Fetching => return Ok(LoadOutcome::AlreadyFetching),
                PageStatus::Exhausted => return Ok(LoadOutcome::Exhausted),
                PageStatus::Idle | PageStatus::Failed(_) => {}
            }
            let previous = std::mem::replace(&mut state.status, PageStatus::Fetching);
            (state.cursor.clone(), FetchGuard::new(self, state.epoch, previous))
        };
        let epoch = guard.epoch;

        debug!(cursor = ?cursor, "fetching feed page");
        let result = self.fetch_page(cursor.clone()).await;
        guard.disarm();

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(cursor = ?cursor, "feed reset during fetch; dropping page");
            return Ok(LoadOutcome::Discarded);
        }

        let page = match result {
            Ok(page) => page,
            Err(error) => {
                warn!(cursor = ?cursor, error = %error, "feed page fetch failed");
                state.status = PageStatus::Failed(error.clone());
                return Err(error);
            }
        };

        if page.is_empty() {
            state.status = PageStatus::Exhausted;
            return Ok(LoadOutcome::Exhausted);
        }

        let next = page.cursor.clone();
        if let Some(next) = &next {
            if !state.used_cursors.insert(next.clone()) {
                warn!(cursor = %next, "service returned an already used cursor; stopping");
                state.status = PageStatus::Exhausted;
                return Ok(LoadOutcome::Exhausted);
            }
        }

        let added = page.len();
        state.status = if page.has_more && next.is_some() {
            PageStatus::Idle
        } else {
            PageStatus::Exhausted
        };
        state.cursor = next;
        state.pages.push(LoadedPage { request: cursor, page });
        Ok(LoadOutcome::Loaded { added })
    }

    /// Refetch the loaded pages if any of them went stale, re-deriving each
    /// cursor from the refreshed page before it so new or deleted posts do
    /// not open gaps. Returns whether the pages were replaced.
    pub async fn revalidate(&self) -> ServiceResult<bool> {
        let (count, guard) = {
            let mut state = self.lock();
            if state.pages.is_empty() || state.status == PageStatus::Fetching {
                return Ok(false);
            }
            let stale = state.pages.iter().any(|loaded| {
                self.cache
                    .get(&CacheKey::feed_page(loaded.request.as_ref()))
                    .is_none_or(|entry| entry.stale)
            });
            if !stale {
                return Ok(false);
            }
            let previous = std::mem::replace(&mut state.status, PageStatus::Fetching);
            (state.pages.len(), FetchGuard::new(self, state.epoch, previous))
        };
        let epoch = guard.epoch;

        debug!(pages = count, "revalidating feed pages");
        let mut refreshed = Vec::with_capacity(count);
        let mut cursor = None;
        let mut has_more = true;
        for _ in 0..count {
            let page = match self.fetch_page(cursor.clone()).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(error = %error, "feed revalidation failed; keeping loaded pages");
                    // Dropping the guard restores the previous status.
                    return Err(error);
                }
            };
            if page.is_empty() {
                has_more = false;
                break;
            }
            let next = page.cursor.clone();
            has_more = page.has_more && next.is_some();
            refreshed.push(LoadedPage { request: cursor, page });
            if !has_more {
                break;
            }
            cursor = next;
        }
        guard.disarm();

        let mut state = self.lock();
        if state.epoch != epoch {
            return Ok(false);
        }
        state.used_cursors = refreshed.iter().filter_map(|loaded| loaded.page.cursor.clone()).collect();
        state.cursor = refreshed.last().and_then(|loaded| loaded.page.cursor.clone());
        state.status = if has_more { PageStatus::Idle } else { PageStatus::Exhausted };
        state.pages = refreshed;
        Ok(true)
    }
}
