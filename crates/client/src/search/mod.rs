// Debounced search stream with generation supersession.
//
// Input arrives through `on_input`. A driver task debounces it and emits a
// search once the term has been quiet for the window; each emission takes the
// next generation. A result is cached and published only if its generation is
// still current when it arrives. Superseded calls are left to finish and their
// results dropped. Clearing the term cancels any pending emission and
// resumes feed pagination.

pub mod debounce;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snapfeed_common::types::Post;
use snapfeed_common::{ServiceError, ServiceResult};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::auth::AuthMonitor;
use crate::cache::{CacheKey, QueryCache, WriteTicket};
use crate::pagination::FeedPaginator;
use crate::rcs::RemoteContentService;

pub use debounce::{InputDebouncer, SearchDebounceConfig};

const EVENT_CAPACITY: usize = 64;

/// An emitted search: the term and the generation it was issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSession {
    pub term: String,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    /// No term; the primary feed is shown.
    Idle,
    /// A term is waiting out the quiet interval.
    Debouncing,
    Searching,
    Ready,
    Failed(ServiceError),
}

#[derive(Debug, Clone)]
pub enum SearchEvent {
    Results { session: SearchSession, posts: Vec<Post> },
    Failed { session: SearchSession, error: ServiceError },
    Cleared { generation: u64 },
}

/// One input as seen by the driver. `seq` orders inputs so an emission can
/// tell whether newer input arrived while it waited.
#[derive(Debug, Clone, Default)]
struct Input {
    seq: u64,
    term: String,
}

struct SearchState {
    term: String,
    input_seq: u64,
    generation: u64,
    active: Option<SearchSession>,
    status: SearchStatus,
}

struct SearchInner {
    cache: QueryCache,
    rcs: Arc<dyn RemoteContentService>,
    auth: AuthMonitor,
    paginator: Option<Arc<FeedPaginator>>,
    state: Mutex<SearchState>,
    events: broadcast::Sender<SearchEvent>,
}

pub struct SearchStream {
    inner: Arc<SearchInner>,
    input: watch::Sender<Input>,
    driver: JoinHandle<()>,
}

impl SearchStream {
    /// Start the stream. Must be called within a Tokio runtime.
    ///
    /// When a paginator is given, it is suspended while a term is active.
    pub fn new(
        cache: QueryCache,
        rcs: Arc<dyn RemoteContentService>,
        auth: AuthMonitor,
        paginator: Option<Arc<FeedPaginator>>,
        config: SearchDebounceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(SearchInner {
            cache,
            rcs,
            auth,
            paginator,
            state: Mutex::new(SearchState {
                term: String::new(),
                input_seq: 0,
                generation: 0,
                active: None,
                status: SearchStatus::Idle,
            }),
            events,
        });
        let (input, rx) = watch::channel(Input::default());
        let driver = tokio::spawn(drive(Arc::clone(&inner), rx, InputDebouncer::new(config)));
        Self { inner, input, driver }
    }

    /// Feed a new search term. Surrounding whitespace is ignored; an empty
    /// term clears the search immediately.
    pub fn on_input(&self, term: &str) {
        let term = term.trim().to_string();
        let seq = {
            let mut state = self.inner.lock();
            state.input_seq += 1;
            if term.is_empty() {
                self.inner.clear(&mut state);
            } else {
                state.term = term.clone();
                state.status = SearchStatus::Debouncing;
                if let Some(paginator) = &self.inner.paginator {
                    paginator.set_suspended(true);
                }
            }
            state.input_seq
        };
        self.input.send_replace(Input { seq, term });
    }

    /// Search the active term again under a new generation if its cached
    /// results went stale. Returns whether a search was issued.
    pub fn revalidate(&self) -> bool {
        let session = {
            let state = self.inner.lock();
            match (&state.active, &state.status) {
                (Some(active), SearchStatus::Ready | SearchStatus::Failed(_))
                    if self.inner.cache.is_stale(&CacheKey::Search(active.term.clone())) =>
                {
                    Some((state.input_seq, active.term.clone()))
                }
                _ => None,
            }
        };
        match session {
            Some((seq, term)) => {
                Arc::clone(&self.inner).emit(seq, term);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.inner.events.subscribe()
    }

    /// The latest term typed, debounced or not.
    pub fn term(&self) -> String {
        self.inner.lock().term.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn status(&self) -> SearchStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.inner.lock().term.is_empty()
    }

    /// The most recently emitted search, if the term has not been cleared.
    pub fn active(&self) -> Option<SearchSession> {
        self.inner.lock().active.clone()
    }

    /// Cached results for the active search.
    pub fn results(&self) -> Option<Vec<Post>> {
        let term = self.inner.lock().active.as_ref().map(|session| session.term.clone())?;
        self.inner.cache.peek::<Vec<Post>>(&CacheKey::Search(term))
    }
}

impl Drop for SearchStream {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl SearchInner {
    fn lock(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear(&self, state: &mut SearchState) {
        let had_term = !state.term.is_empty() || state.active.is_some();
        state.term.clear();
        state.generation += 1;
        state.active = None;
        state.status = SearchStatus::Idle;
        if let Some(paginator) = &self.paginator {
            paginator.set_suspended(false);
        }
        if had_term {
            debug!(generation = state.generation, "search cleared");
            let _ = self.events.send(SearchEvent::Cleared { generation: state.generation });
        }
    }

    /// Issue the search for `term` if no newer input arrived since `seq`.
    fn emit(self: Arc<Self>, seq: u64, term: String) {
        let session = {
            let mut state = self.lock();
            if state.input_seq != seq {
                debug!(term = %term, "newer input arrived; skipping emission");
                return;
            }
            state.generation += 1;
            let session = SearchSession { term, generation: state.generation };
            state.active = Some(session.clone());
            state.status = SearchStatus::Searching;
            session
        };

        if let Some(posts) = self.cache.peek_fresh::<Vec<Post>>(&CacheKey::Search(session.term.clone())) {
            debug!(term = %session.term, generation = session.generation, "search served from cache");
            self.finish(session, Ok(posts), None);
            return;
        }

        info!(term = %session.term, generation = session.generation, "searching");
        let ticket = self.cache.begin_write(CacheKey::Search(session.term.clone()));
        tokio::spawn(async move {
            let result = self.rcs.search_posts(session.term.clone()).await;
            self.finish(session, result, Some(ticket));
        });
    }

    /// Publish the outcome of `session`. `ticket` is the cache write begun
    /// when the call was issued; `None` for results served from the cache.
    fn finish(
        &self,
        session: SearchSession,
        result: ServiceResult<Vec<Post>>,
        ticket: Option<WriteTicket>,
    ) {
        let mut state = self.lock();
        if state.generation != session.generation {
            debug!(
                term = %session.term,
                generation = session.generation,
                current = state.generation,
                "discarding superseded search result"
            );
            if let Some(ticket) = ticket {
                self.cache.abandon_write(ticket);
            }
            return;
        }

        // A newer term still waiting out the quiet interval keeps the stream
        // in `Debouncing`.
        let settled = state.term == session.term;
        let event = match result {
            Ok(posts) => {
                if let Some(ticket) = ticket {
                    self.cache.complete_write(ticket, posts.clone());
                }
                if settled {
                    state.status = SearchStatus::Ready;
                }
                SearchEvent::Results { session, posts }
            }
            Err(error) => {
                warn!(term = %session.term, error = %error, "search failed");
                if let Some(ticket) = ticket {
                    self.cache.abandon_write(ticket);
                }
                self.auth.report(&error);
                if settled {
                    state.status = SearchStatus::Failed(error.clone());
                }
                SearchEvent::Failed { session, error }
            }
        };
        drop(state);
        let _ = self.events.send(event);
    }
}

async fn drive(
    inner: Arc<SearchInner>,
    mut input: watch::Receiver<Input>,
    mut debouncer: InputDebouncer<Input>,
) {
    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            biased;
            changed = input.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = input.borrow_and_update().clone();
                if latest.term.is_empty() {
                    debouncer.cancel();
                } else {
                    debouncer.push(latest);
                }
            }
            () = wait_until(deadline) => {
                if let Some(ready) = debouncer.take_ready() {
                    Arc::clone(&inner).emit(ready.seq, ready.term);
                }
            }
        }
    }
    debug!("search driver stopped");
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcs::memory::InMemoryContentService;
    use crate::rcs::Operation;
    use std::time::Duration;

    fn stream(service: &Arc<InMemoryContentService>, cache: &QueryCache) -> SearchStream {
        SearchStream::new(
            cache.clone(),
            service.clone(),
            AuthMonitor::new(),
            None,
            SearchDebounceConfig::default(),
        )
    }

    async fn next_results(events: &mut broadcast::Receiver<SearchEvent>) -> (SearchSession, Vec<Post>) {
        loop {
            match events.recv().await.expect("event") {
                SearchEvent::Results { session, posts } => return (session, posts),
                SearchEvent::Failed { error, .. } => panic!("search failed: {error}"),
                SearchEvent::Cleared { .. } => {}
            }
        }
    }

    // ── Debounce ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn typing_burst_emits_once() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let stream = stream(&service, &cache);
        let mut events = stream.subscribe();

        for partial in ["f", "fo", "foo", "food"] {
            stream.on_input(partial);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(stream.status(), SearchStatus::Debouncing);
        assert_eq!(service.calls(Operation::SearchPosts), 0);

        let (session, posts) = next_results(&mut events).await;
        assert_eq!(session, SearchSession { term: "food".into(), generation: 1 });
        assert!(!posts.is_empty());
        assert!(posts.iter().all(|post| post.caption.to_lowercase().contains("food")
            || post.tags.contains("food")));
        assert_eq!(service.calls(Operation::SearchPosts), 1);
        assert_eq!(stream.results().map(|r| r.len()), Some(posts.len()));
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_cancels_pending_emission() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let stream = stream(&service, &cache);

        stream.on_input("cat");
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream.on_input("   ");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(service.calls(Operation::SearchPosts), 0);
        assert_eq!(stream.status(), SearchStatus::Idle);
        assert!(!stream.is_active());
        assert!(stream.active().is_none());
    }

    // ── Supersession ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn result_arriving_after_clear_is_dropped() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let stream = stream(&service, &cache);
        let gate = service.hold(Operation::SearchPosts);

        stream.on_input("cat");
        gate.arrived().await;
        stream.on_input("");
        gate.release();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache.peek::<Vec<Post>>(&CacheKey::Search("cat".into())).is_none());
        assert_eq!(stream.status(), SearchStatus::Idle);
        assert_eq!(service.calls(Operation::SearchPosts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn result_landing_while_newer_term_debounces_keeps_debouncing() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let stream = stream(&service, &cache);
        let mut events = stream.subscribe();
        let gate = service.hold_matching(Operation::SearchPosts, "cat");

        stream.on_input("cat");
        gate.arrived().await;
        stream.on_input("cats");
        gate.release();

        let (session, _) = next_results(&mut events).await;
        assert_eq!(session.term, "cat");
        assert_eq!(stream.status(), SearchStatus::Debouncing);

        let (session, _) = next_results(&mut events).await;
        assert_eq!(session, SearchSession { term: "cats".into(), generation: 2 });
        assert_eq!(stream.status(), SearchStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_term_is_served_from_cache() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let stream = stream(&service, &cache);
        let mut events = stream.subscribe();

        stream.on_input("cat");
        next_results(&mut events).await;
        stream.on_input("cats");
        next_results(&mut events).await;
        stream.on_input("cat");
        let (session, _) = next_results(&mut events).await;

        assert_eq!(session.generation, 3);
        assert_eq!(service.calls(Operation::SearchPosts), 2);
    }

    // ── Failure ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unauthorized_search_expires_session() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let auth = AuthMonitor::new();
        let stream = SearchStream::new(
            cache.clone(),
            service.clone(),
            auth.clone(),
            None,
            SearchDebounceConfig::default(),
        );
        let mut events = stream.subscribe();
        service.fail_next(Operation::SearchPosts, ServiceError::unauthorized("token expired"));

        stream.on_input("cat");
        let error = loop {
            if let SearchEvent::Failed { error, .. } = events.recv().await.expect("event") {
                break error;
            }
        };
        assert!(error.is_unauthorized());
        assert!(auth.state().is_expired());
        assert!(matches!(stream.status(), SearchStatus::Failed(_)));
        assert!(cache.peek::<Vec<Post>>(&CacheKey::Search("cat".into())).is_none());
    }

    // ── Feed interplay ─────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn active_term_suspends_pagination() {
        let service = Arc::new(InMemoryContentService::demo());
        let cache = QueryCache::new();
        let paginator = Arc::new(FeedPaginator::new(cache.clone(), service.clone(), 10));
        let stream = SearchStream::new(
            cache.clone(),
            service.clone(),
            AuthMonitor::new(),
            Some(Arc::clone(&paginator)),
            SearchDebounceConfig::default(),
        );

        stream.on_input("cat");
        assert!(paginator.is_suspended());
        stream.on_input("");
        assert!(!paginator.is_suspended());
    }
}
