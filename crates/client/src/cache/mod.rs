// Query cache: keyed store of fetched results with freshness bookkeeping.
//
// One cache per session, shared by handle. Entries change only through a
// completed fetch or tracked write (or an explicit put) and through invalidation, which marks
// them stale without dropping the value so views can keep rendering it while
// a refetch runs. Concurrent reads of a key share one in-flight fetch.

pub mod key;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use snapfeed_common::types::{FeedPage, Post, PostId, User};
use snapfeed_common::{ServiceError, ServiceResult};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

pub use key::{CacheKey, KeyPattern};

const EVENT_CAPACITY: usize = 256;

// ── Values ─────────────────────────────────────────────────────────

/// Any result the cache can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Post(Post),
    FeedPage(FeedPage),
    Posts(Vec<Post>),
    User(User),
    Users(Vec<User>),
}

impl CachedValue {
    /// The snapshot of `id` carried by this value, if any.
    pub fn find_post(&self, id: &PostId) -> Option<&Post> {
        match self {
            Self::Post(post) => (&post.id == id).then_some(post),
            Self::FeedPage(page) => page.posts.iter().find(|post| &post.id == id),
            Self::Posts(posts) => posts.iter().find(|post| &post.id == id),
            Self::User(_) | Self::Users(_) => None,
        }
    }
}

/// Types that can be stored in and read back from the cache.
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn into_value(self) -> CachedValue;
    fn from_value(value: &CachedValue) -> Option<Self>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn into_value(self) -> CachedValue {
                CachedValue::$variant(self)
            }

            fn from_value(value: &CachedValue) -> Option<Self> {
                match value {
                    CachedValue::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(Post, Post);
cacheable!(FeedPage, FeedPage);
cacheable!(Vec<Post>, Posts);
cacheable!(User, User);
cacheable!(Vec<User>, Users);

// ── Entries & events ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CachedValue,
    pub fetched_at: Instant,
    /// Must be refetched before a read trusts it; may still be rendered.
    pub stale: bool,
    /// Cache revision at which the fetch producing this value started.
    pub revision: u64,
}

/// Change notification; rendering layers subscribe to these.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated { key: CacheKey, revision: u64 },
    Invalidated { key: CacheKey },
    FetchFailed { key: CacheKey, error: ServiceError },
    Cleared,
}

// ── Cache ──────────────────────────────────────────────────────────

type SharedFetch = Shared<BoxFuture<'static, ServiceResult<CachedValue>>>;

struct InFlight {
    fetch_id: u64,
    /// Set when the key is invalidated while the fetch runs; the result then
    /// lands already stale.
    invalidated: bool,
    /// Absent for writes started with `begin_write`; readers cannot join those.
    future: Option<SharedFetch>,
}

/// A remote call registered with the cache before it was issued.
///
/// Returned by `begin_write`. The call's result is written with
/// `complete_write`, which stores it at the revision taken when the call
/// started and marks it stale if the key was invalidated meanwhile.
#[derive(Debug)]
#[must_use = "a write ticket must be completed or abandoned"]
pub struct WriteTicket {
    key: CacheKey,
    fetch_id: u64,
    revision: u64,
}

impl WriteTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
    revision: u64,
    next_fetch_id: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
    max_age: Option<Duration>,
}

/// Session-scoped query cache. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("QueryCache")
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .field("revision", &state.revision)
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_max_age(None)
    }

    /// A cache whose entries also go stale `max_age` after they were fetched.
    pub fn with_max_age(max_age: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                events,
                max_age,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        if entry.stale {
            return false;
        }
        match self.inner.max_age {
            Some(max_age) => now.duration_since(entry.fetched_at) < max_age,
            None => true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Current revision counter. Bumped on every fetch start and every put.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Snapshot of an entry. `stale` also reflects age-based expiry.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let state = self.lock();
        let entry = state.entries.get(key)?;
        let mut snapshot = entry.clone();
        snapshot.stale = !self.is_fresh(entry, Instant::now());
        Some(snapshot)
    }

    /// Cached value regardless of staleness (stale-while-revalidate).
    pub fn peek<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        self.lock().entries.get(key).and_then(|entry| T::from_value(&entry.value))
    }

    /// Cached value only if it is fresh.
    pub fn peek_fresh<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        let state = self.lock();
        let entry = state.entries.get(key)?;
        if !self.is_fresh(entry, Instant::now()) {
            return None;
        }
        T::from_value(&entry.value)
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.get(key).is_some_and(|entry| entry.stale)
    }

    /// Store a value directly, as if a fetch had just completed.
    pub fn put<T: Cacheable>(&self, key: CacheKey, value: T) {
        let revision = {
            let mut state = self.lock();
            state.revision += 1;
            let revision = state.revision;
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    value: value.into_value(),
                    fetched_at: Instant::now(),
                    stale: false,
                    revision,
                },
            );
            revision
        };
        self.emit(CacheEvent::Updated { key, revision });
    }

    /// Mark one key stale. Returns whether anything was cached or in flight.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        !self.invalidate_matching(|candidate| candidate == key).is_empty()
    }

    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        self.invalidate_matching(|key| pattern.matches(key))
    }

    /// Mark every key satisfying `predicate` stale, including keys whose
    /// fetch is still running. Returns the affected keys.
    pub fn invalidate_matching(&self, predicate: impl Fn(&CacheKey) -> bool) -> Vec<CacheKey> {
        let mut touched = Vec::new();
        let mut notify = Vec::new();
        {
            let mut state = self.lock();
            for (key, entry) in state.entries.iter_mut() {
                if predicate(key) {
                    if !entry.stale {
                        notify.push(key.clone());
                    }
                    entry.stale = true;
                    touched.push(key.clone());
                }
            }
            for (key, in_flight) in state.in_flight.iter_mut() {
                if predicate(key) {
                    in_flight.invalidated = true;
                    if !touched.contains(key) {
                        touched.push(key.clone());
                    }
                }
            }
        }
        for key in notify {
            debug!(key = %key, "cache entry invalidated");
            self.emit(CacheEvent::Invalidated { key });
        }
        touched
    }

    /// Drop every entry. Fetches still running will not write back.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.entries.clear();
            state.in_flight.clear();
        }
        self.emit(CacheEvent::Cleared);
    }

    /// Newest cached snapshot of a post across every entry that carries it,
    /// with the revision of that entry.
    pub fn find_post(&self, id: &PostId) -> Option<(Post, u64)> {
        let state = self.lock();
        state
            .entries
            .values()
            .filter_map(|entry| entry.value.find_post(id).map(|post| (post, entry.revision)))
            .max_by_key(|(_, revision)| *revision)
            .map(|(post, revision)| (post.clone(), revision))
    }

    /// Read through the cache.
    ///
    /// A fresh entry is returned as is. Otherwise the loader runs, unless a
    /// fetch for the key is already in flight, in which case its result is
    /// shared. A failed load leaves the previous entry untouched.
    pub async fn read<T, F, Fut>(&self, key: CacheKey, loader: F) -> ServiceResult<T>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>> + Send + 'static,
    {
        let fetch = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(&key) {
                if self.is_fresh(entry, Instant::now()) {
                    if let Some(value) = T::from_value(&entry.value) {
                        return Ok(value);
                    }
                }
            }
            match state.in_flight.get(&key).and_then(|in_flight| in_flight.future.clone()) {
                Some(future) => {
                    debug!(key = %key, "joining in-flight fetch");
                    future
                }
                None => self.start_fetch(&mut state, key.clone(), loader()),
            }
        };

        let value = fetch.await?;
        T::from_value(&value).ok_or_else(|| {
            ServiceError::network(format!("cached value for {key} has an unexpected shape"))
        })
    }

    /// Register a call for `key` whose result the caller writes back itself.
    ///
    /// Any earlier fetch or write for the key is superseded and will not
    /// write back. Invalidations of `key` while the call runs make its result
    /// land stale.
    pub fn begin_write(&self, key: CacheKey) -> WriteTicket {
        let mut state = self.lock();
        let (fetch_id, revision) = Self::next_fetch(&mut state);
        debug!(key = %key, revision, "starting tracked write");
        state.in_flight.insert(key.clone(), InFlight { fetch_id, invalidated: false, future: None });
        WriteTicket { key, fetch_id, revision }
    }

    /// Store the result of a call started with `begin_write`. Returns whether
    /// it was stored; a superseded ticket or a newer entry discards it.
    pub fn complete_write<T: Cacheable>(&self, ticket: WriteTicket, value: T) -> bool {
        let WriteTicket { key, fetch_id, revision } = ticket;
        let event = {
            let mut state = self.lock();
            let Some(invalidated) = Self::take_in_flight(&mut state, &key, fetch_id) else {
                return false;
            };
            Self::land(&mut state, &key, value.into_value(), revision, invalidated)
        };
        match event {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    /// Give up on a call started with `begin_write` without writing anything.
    pub fn abandon_write(&self, ticket: WriteTicket) {
        let mut state = self.lock();
        if Self::take_in_flight(&mut state, &ticket.key, ticket.fetch_id).is_some() {
            debug!(key = %ticket.key, "tracked write abandoned");
        }
    }

    fn next_fetch(state: &mut CacheState) -> (u64, u64) {
        state.revision += 1;
        let fetch_id = state.next_fetch_id;
        state.next_fetch_id += 1;
        (fetch_id, state.revision)
    }

    /// Remove the in-flight record for `key` if it still belongs to
    /// `fetch_id`, returning whether it was invalidated meanwhile.
    fn take_in_flight(state: &mut CacheState, key: &CacheKey, fetch_id: u64) -> Option<bool> {
        match state.in_flight.get(key) {
            Some(in_flight) if in_flight.fetch_id == fetch_id => {
                state.in_flight.remove(key).map(|in_flight| in_flight.invalidated)
            }
            _ => {
                debug!(key = %key, "dropping result of abandoned fetch");
                None
            }
        }
    }

    fn land(
        state: &mut CacheState,
        key: &CacheKey,
        value: CachedValue,
        revision: u64,
        invalidated: bool,
    ) -> Option<CacheEvent> {
        if state.entries.get(key).is_some_and(|entry| entry.revision > revision) {
            debug!(key = %key, revision, "newer value already cached");
            return None;
        }
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                value,
                fetched_at: Instant::now(),
                stale: invalidated,
                revision,
            },
        );
        Some(CacheEvent::Updated { key: key.clone(), revision })
    }

    fn start_fetch<T, Fut>(&self, state: &mut CacheState, key: CacheKey, load: Fut) -> SharedFetch
    where
        T: Cacheable,
        Fut: Future<Output = ServiceResult<T>> + Send + 'static,
    {
        let (fetch_id, revision) = Self::next_fetch(state);
        debug!(key = %key, revision, "starting fetch");

        let cache = self.clone();
        let settle_key = key.clone();
        let future = async move {
            let result = load.await.map(Cacheable::into_value);
            cache.settle(&settle_key, fetch_id, revision, &result);
            result
        }
        .boxed()
        .shared();

        state
            .in_flight
            .insert(key, InFlight { fetch_id, invalidated: false, future: Some(future.clone()) });
        future
    }

    fn settle(
        &self,
        key: &CacheKey,
        fetch_id: u64,
        revision: u64,
        result: &ServiceResult<CachedValue>,
    ) {
        let event = {
            let mut state = self.lock();
            let Some(invalidated) = Self::take_in_flight(&mut state, key, fetch_id) else {
                return;
            };
            match result {
                Ok(value) => Self::land(&mut state, key, value.clone(), revision, invalidated),
                Err(error) => {
                    debug!(key = %key, error = %error, "fetch failed; keeping previous entry");
                    Some(CacheEvent::FetchFailed { key: key.clone(), error: error.clone() })
                }
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }
}
