// Optimistic mutation coordinator.
//
// Every optimistic change goes through `MutationCoordinator::apply`:
// 1. the transform runs synchronously against the displayed value,
// 2. the remote thunk runs on a spawned task,
// 3. success commits the patch and invalidates dependent cache keys,
// 4. failure rolls the displayed value back to exactly what it was.
//
// At most one remote call per `(target, field)` is in flight. Changes issued
// while one is pending queue behind it and compose; if the queue nets out to
// the in-flight value it is dropped and its callers share the in-flight
// result. When the in-flight call settles, the queue is replayed on top of the
// confirmed value as a single follow-up call, so settlement follows issue
// order per key.

pub mod descriptors;
pub mod patch;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snapfeed_common::{ServiceError, ServiceResult};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::auth::AuthMonitor;
use crate::cache::{CacheKey, QueryCache};
use crate::invalidation::{InvalidationGraph, MutationKind, MutationTarget};
use crate::rcs::RcsFuture;

pub use descriptors::{like_toggle, save_toggle, Mutation, RemoteInput, RemoteThunk, Seed, Transform};
pub use patch::{FieldValue, OptimisticPatch, PatchField, PatchKey, PatchStatus, SaveState};

const EVENT_CAPACITY: usize = 256;

// ── Errors & events ────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A queued change was dropped because the change ahead of it failed.
    #[error("queued change on {0} discarded after the pending change was rolled back")]
    Cancelled(PatchKey),

    #[error("mutation task ended before settling")]
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    Applied { key: PatchKey, kind: MutationKind, proposed: FieldValue },
    Queued { key: PatchKey, kind: MutationKind },
    Coalesced { key: PatchKey, kind: MutationKind },
    Committed { key: PatchKey, kind: MutationKind, value: FieldValue },
    RolledBack { key: PatchKey, kind: MutationKind, restored: FieldValue, error: ServiceError },
    /// A non-optimistic mutation succeeded.
    Completed { kind: MutationKind, target: MutationTarget },
    /// A non-optimistic mutation failed.
    Failed { kind: MutationKind, target: MutationTarget, error: ServiceError },
}

// ── Tickets & views ────────────────────────────────────────────────

type Waiter = oneshot::Sender<Result<FieldValue, MutationError>>;

/// Returned by `apply`. Carries the optimistic value and resolves when the
/// change settles.
#[derive(Debug)]
pub struct MutationTicket {
    key: PatchKey,
    optimistic: FieldValue,
    rx: oneshot::Receiver<Result<FieldValue, MutationError>>,
}

impl MutationTicket {
    pub fn key(&self) -> &PatchKey {
        &self.key
    }

    /// Value displayed immediately after `apply`.
    pub fn optimistic_value(&self) -> &FieldValue {
        &self.optimistic
    }

    /// The value the service confirmed, or why the change did not stick.
    pub async fn settled(self) -> Result<FieldValue, MutationError> {
        self.rx.await.unwrap_or(Err(MutationError::Dropped))
    }
}

/// Displayed state of one `(target, field)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    pub value: FieldValue,
    pub pending: bool,
    pub error: Option<ServiceError>,
}

// ── Internal state ─────────────────────────────────────────────────

struct QueuedChange {
    transform: Transform,
    remote: RemoteThunk,
    waiter: Waiter,
}

struct Slot {
    patch: OptimisticPatch,
    waiters: Vec<Waiter>,
    queued: Vec<QueuedChange>,
}

impl Slot {
    fn display(&self) -> FieldValue {
        self.queued
            .iter()
            .fold(self.patch.proposed_value.clone(), |value, change| (change.transform)(&value))
    }
}

/// Last service-confirmed value, kept until the cache holds something newer.
struct Confirmed {
    value: FieldValue,
    at_revision: u64,
}

/// Error of the last rolled-back change, kept until the cache holds
/// something newer.
struct Failure {
    error: ServiceError,
    at_revision: u64,
}

#[derive(Default)]
struct CoordinatorState {
    slots: HashMap<PatchKey, Slot>,
    confirmed: HashMap<PatchKey, Confirmed>,
    errors: HashMap<PatchKey, Failure>,
}

/// Revision of the newest cached value a view of `key` would be seeded from.
fn cached_revision(cache: &QueryCache, key: &PatchKey) -> Option<u64> {
    let from_post = || cache.find_post(&key.target).map(|(_, revision)| revision);
    match key.field {
        PatchField::LikedBy => from_post(),
        PatchField::Saved => cache
            .get(&CacheKey::CurrentUser)
            .map(|entry| entry.revision)
            .or_else(from_post),
    }
}

impl CoordinatorState {
    /// Forget overlays and errors the cache has since caught up with, so
    /// both maps stay bounded by the keys still awaiting a refetch.
    fn prune(&mut self, cache: &QueryCache) {
        let superseded =
            |key: &PatchKey, at: u64| cached_revision(cache, key).is_some_and(|revision| revision > at);
        self.confirmed.retain(|key, confirmed| !superseded(key, confirmed.at_revision));
        self.errors.retain(|key, failure| !superseded(key, failure.at_revision));
    }

    /// Current value of `key`: the confirmed overlay unless the cache has been
    /// refetched since, in which case the cached seed.
    fn resolve(&mut self, key: &PatchKey, seed: &Seed) -> FieldValue {
        let outdated =
            self.confirmed.get(key).is_some_and(|confirmed| confirmed.at_revision < seed.revision);
        if outdated {
            self.confirmed.remove(key);
        }
        match self.confirmed.get(key) {
            Some(confirmed) => confirmed.value.clone(),
            None => seed.value.clone(),
        }
    }
}

struct CoordinatorInner {
    cache: QueryCache,
    graph: InvalidationGraph,
    auth: AuthMonitor,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<MutationEvent>,
}

// ── Coordinator ────────────────────────────────────────────────────

/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl MutationCoordinator {
    pub fn new(cache: QueryCache, graph: InvalidationGraph, auth: AuthMonitor) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                cache,
                graph,
                auth,
                state: Mutex::new(CoordinatorState::default()),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MutationEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.events.subscribe()
    }

    /// Apply a change locally and start (or queue) its remote call.
    ///
    /// Must be called within a tokio runtime.
    pub fn apply(&self, mutation: Mutation) -> MutationTicket {
        let Mutation { kind, key, seed, transform, remote } = mutation;
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        state.errors.remove(&key);
        state.prune(&self.inner.cache);

        if let Some(slot) = state.slots.get_mut(&key) {
            let optimistic = transform(&slot.display());
            let event = if optimistic.same_intent(&slot.patch.proposed_value) {
                let queued = std::mem::take(&mut slot.queued);
                slot.waiters.extend(queued.into_iter().map(|change| change.waiter));
                slot.waiters.push(tx);
                debug!(key = %key, "change nets out to the pending one; coalesced");
                MutationEvent::Coalesced { key: key.clone(), kind }
            } else {
                slot.queued.push(QueuedChange { transform, remote, waiter: tx });
                debug!(key = %key, queued = slot.queued.len(), "change queued behind pending one");
                MutationEvent::Queued { key: key.clone(), kind }
            };
            drop(state);
            self.emit(event);
            return MutationTicket { key, optimistic, rx };
        }

        let base = state.resolve(&key, &seed);
        let proposed = transform(&base);
        state.slots.insert(
            key.clone(),
            Slot {
                patch: OptimisticPatch::new(&key, base.clone(), proposed.clone()),
                waiters: vec![tx],
                queued: Vec::new(),
            },
        );
        drop(state);

        debug!(key = %key, kind = %kind, "optimistic change applied");
        self.spawn_remote(kind, key.clone(), remote(RemoteInput { base, proposed: proposed.clone() }));
        self.emit(MutationEvent::Applied { key: key.clone(), kind, proposed: proposed.clone() });
        MutationTicket { key, optimistic: proposed, rx }
    }

    fn spawn_remote(&self, kind: MutationKind, key: PatchKey, call: RcsFuture<'static, FieldValue>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let result = call.await;
            coordinator.settle(kind, key, result);
        });
    }

    fn settle(&self, kind: MutationKind, key: PatchKey, result: ServiceResult<FieldValue>) {
        let mut state = self.lock();
        let Some(mut slot) = state.slots.remove(&key) else {
            warn!(key = %key, "settled a change with no pending slot");
            return;
        };
        state.prune(&self.inner.cache);

        match result {
            Ok(confirmed) => {
                slot.patch.commit();
                let at_revision = self.inner.cache.revision();
                state
                    .confirmed
                    .insert(key.clone(), Confirmed { value: confirmed.clone(), at_revision });

                let mut follow_up = None;
                let mut netted_out = Vec::new();
                if !slot.queued.is_empty() {
                    let queued = std::mem::take(&mut slot.queued);
                    let proposed = queued
                        .iter()
                        .fold(confirmed.clone(), |value, change| (change.transform)(&value));
                    if proposed.same_intent(&confirmed) {
                        netted_out.extend(queued.into_iter().map(|change| change.waiter));
                    } else {
                        let mut waiters = Vec::with_capacity(queued.len());
                        let mut remote = None;
                        for change in queued {
                            waiters.push(change.waiter);
                            remote = Some(change.remote);
                        }
                        if let Some(remote) = remote {
                            state.slots.insert(
                                key.clone(),
                                Slot {
                                    patch: OptimisticPatch::new(
                                        &key,
                                        confirmed.clone(),
                                        proposed.clone(),
                                    ),
                                    waiters,
                                    queued: Vec::new(),
                                },
                            );
                            follow_up = Some((remote, proposed));
                        }
                    }
                }
                drop(state);

                let target = MutationTarget::post(key.target.clone());
                if let Err(error) = self.inner.graph.apply(&self.inner.cache, kind, &target) {
                    warn!(key = %key, error = %error, "invalidation failed after commit");
                }
                info!(key = %key, kind = %kind, "change committed");

                for waiter in slot.waiters.into_iter().chain(netted_out) {
                    let _ = waiter.send(Ok(confirmed.clone()));
                }
                self.emit(MutationEvent::Committed { key: key.clone(), kind, value: confirmed.clone() });

                if let Some((remote, proposed)) = follow_up {
                    debug!(key = %key, "replaying queued change on confirmed value");
                    self.spawn_remote(
                        kind,
                        key.clone(),
                        remote(RemoteInput { base: confirmed, proposed: proposed.clone() }),
                    );
                    self.emit(MutationEvent::Applied { key, kind, proposed });
                }
            }
            Err(error) => {
                let restored = slot.patch.roll_back();
                let at_revision = self.inner.cache.revision();
                state.errors.insert(key.clone(), Failure { error: error.clone(), at_revision });
                drop(state);

                warn!(key = %key, kind = %kind, error = %error, "change rolled back");
                self.inner.auth.report(&error);
                for waiter in slot.waiters {
                    let _ = waiter.send(Err(MutationError::Service(error.clone())));
                }
                for change in slot.queued {
                    let _ = change.waiter.send(Err(MutationError::Cancelled(key.clone())));
                }
                self.emit(MutationEvent::RolledBack { key, kind, restored, error });
            }
        }
    }

    /// Run a non-optimistic mutation: nothing changes locally until it
    /// succeeds, then dependent keys are invalidated.
    pub async fn run_remote<T, Fut>(
        &self,
        kind: MutationKind,
        target: MutationTarget,
        call: Fut,
    ) -> Result<T, MutationError>
    where
        Fut: Future<Output = ServiceResult<T>>,
    {
        match call.await {
            Ok(value) => {
                if let Err(error) = self.inner.graph.apply(&self.inner.cache, kind, &target) {
                    warn!(kind = %kind, error = %error, "invalidation failed after commit");
                }
                info!(kind = %kind, "mutation completed");
                self.emit(MutationEvent::Completed { kind, target });
                Ok(value)
            }
            Err(error) => {
                warn!(kind = %kind, error = %error, "mutation failed");
                self.inner.auth.report(&error);
                self.emit(MutationEvent::Failed { kind, target, error: error.clone() });
                Err(MutationError::Service(error))
            }
        }
    }

    /// Displayed value of `key`, given the cached value it would otherwise show.
    pub fn view(&self, key: &PatchKey, seed: &Seed) -> FieldView {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get(key) {
            return FieldView { value: slot.display(), pending: true, error: None };
        }
        let value = state.resolve(key, seed);
        let error = state.errors.get(key).map(|failure| failure.error.clone());
        FieldView { value, pending: false, error }
    }

    pub fn is_pending(&self, key: &PatchKey) -> bool {
        self.lock().slots.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn last_error(&self, key: &PatchKey) -> Option<ServiceError> {
        self.lock().errors.get(key).map(|failure| failure.error.clone())
    }

    pub fn clear_error(&self, key: &PatchKey) {
        self.lock().errors.remove(key);
    }
}
