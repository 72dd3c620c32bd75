// In-memory content service.
//
// Holds posts, users, and save records in process. Used by the integration
// tests and by the CLI `--demo` mode. Test hooks:
// - `fail_next(op, error)` makes the next call of `op` fail.
// - `hold(op)` parks the next call of `op` at a gate until released, so a
//   test can control exactly when a response arrives.
// - `hold_reply(op)` answers the next call of `op` right away but holds the
//   answer back until released, so it reflects the store at call time.
// - `calls(op)` counts calls for at-most-once assertions.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use snapfeed_common::types::{
    Cursor, FeedPage, NewPost, Post, PostId, PostUpdate, ProfileUpdate, SaveRecord, SaveRecordId,
    User, UserId,
};
use snapfeed_common::{ServiceError, ServiceResult};
use tokio::sync::{watch, Semaphore};
use tracing::debug;
use uuid::Uuid;

use super::{Operation, RcsFuture, RemoteContentService};

/// 2026-01-01T00:00:00Z
const DEMO_EPOCH_SECS: i64 = 1_767_225_600;

// ── Hooks ──────────────────────────────────────────────────────────

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub operation: Operation,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateStage {
    /// Before the store is read.
    Request,
    /// After the answer is computed, before it is returned.
    Reply,
}

struct PendingGate {
    operation: Operation,
    argument: Option<String>,
    stage: GateStage,
    release: Arc<Semaphore>,
    arrived: watch::Sender<bool>,
}

/// Handle to a call parked by `hold`.
#[derive(Debug, Clone)]
pub struct Gate {
    release: Arc<Semaphore>,
    arrived: watch::Receiver<bool>,
}

impl Gate {
    /// Let the parked call proceed.
    pub fn release(&self) {
        self.release.add_permits(1);
    }

    pub fn has_arrived(&self) -> bool {
        *self.arrived.borrow()
    }

    /// Wait until a call has reached the gate.
    pub async fn arrived(&self) {
        let mut arrived = self.arrived.clone();
        let _ = arrived.wait_for(|reached| *reached).await;
    }
}

#[derive(Default)]
struct Hooks {
    failures: HashMap<Operation, VecDeque<ServiceError>>,
    gates: Vec<PendingGate>,
    calls: Vec<CallRecord>,
}

// ── Stored state ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredSave {
    post_id: PostId,
    user_id: UserId,
}

#[derive(Default)]
struct Store {
    /// Newest first.
    posts: Vec<Post>,
    users: BTreeMap<UserId, User>,
    viewer: Option<UserId>,
    saves: BTreeMap<SaveRecordId, StoredSave>,
    next_save: u64,
    session_expired: bool,
}

impl Store {
    fn position(&self, id: &PostId) -> ServiceResult<usize> {
        self.posts
            .iter()
            .position(|post| &post.id == id)
            .ok_or_else(|| ServiceError::not_found(format!("post {id}")))
    }

    /// A post as seen by the current viewer.
    fn view(&self, post: &Post) -> Post {
        let mut post = post.clone();
        post.save_record_id = self.viewer.as_ref().and_then(|viewer| {
            self.saves
                .iter()
                .find(|(_, save)| save.post_id == post.id && &save.user_id == viewer)
                .map(|(id, _)| id.clone())
        });
        post
    }

    /// A user with save records and liked posts filled in from the store.
    fn compose_user(&self, user: &User) -> User {
        let mut user = user.clone();
        user.saves = self
            .saves
            .iter()
            .filter(|(_, save)| save.user_id == user.id)
            .map(|(id, save)| SaveRecord { id: id.clone(), post_id: save.post_id.clone() })
            .collect();
        user.liked = self
            .posts
            .iter()
            .filter(|post| post.liked_by.contains(&user.id))
            .map(|post| post.id.clone())
            .collect();
        user
    }

    fn user(&self, id: &UserId) -> ServiceResult<User> {
        self.users
            .get(id)
            .map(|user| self.compose_user(user))
            .ok_or_else(|| ServiceError::not_found(format!("user {id}")))
    }

    /// Insert in newest-first order, replacing any post with the same id.
    fn insert_post(&mut self, post: Post) {
        self.posts.retain(|existing| existing.id != post.id);
        let at = self
            .posts
            .iter()
            .position(|existing| existing.created_at < post.created_at)
            .unwrap_or(self.posts.len());
        self.posts.insert(at, post);
    }
}

// ── Service ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryContentService {
    store: Mutex<Store>,
    hooks: Mutex<Hooks>,
}

impl InMemoryContentService {
    /// An empty service whose signed-in user is `viewer`.
    pub fn new(viewer: User) -> Self {
        let service = Self::default();
        {
            let mut store = service.store();
            store.viewer = Some(viewer.id.clone());
            store.users.insert(viewer.id.clone(), viewer);
        }
        service
    }

    /// Seeded with three users and 25 posts, one hour apart.
    pub fn demo() -> Self {
        let users = demo_users();
        let service = Self::new(users[0].clone());
        for user in users.iter().skip(1) {
            service.insert_user(user.clone());
        }
        for post in demo_posts(&users, 25) {
            service.insert_post(post);
        }
        service
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_post(&self, post: Post) {
        self.store().insert_post(post);
    }

    pub fn insert_user(&self, user: User) {
        self.store().users.insert(user.id.clone(), user);
    }

    /// Server-side snapshot of a post, bypassing hooks.
    pub fn post(&self, id: &PostId) -> Option<Post> {
        let store = self.store();
        store.posts.iter().find(|post| &post.id == id).map(|post| store.view(post))
    }

    /// Every save record currently stored for `user`.
    pub fn save_records_for(&self, user: &UserId) -> Vec<SaveRecord> {
        self.store()
            .saves
            .iter()
            .filter(|(_, save)| &save.user_id == user)
            .map(|(id, save)| SaveRecord { id: id.clone(), post_id: save.post_id.clone() })
            .collect()
    }

    pub fn viewer(&self) -> Option<UserId> {
        self.store().viewer.clone()
    }

    /// Reject every following call as unauthorized.
    pub fn expire_session(&self) {
        self.store().session_expired = true;
    }

    pub fn restore_session(&self) {
        self.store().session_expired = false;
    }

    /// Fail the next call of `operation` with `error`. Queues if called repeatedly.
    pub fn fail_next(&self, operation: Operation, error: ServiceError) {
        self.hooks().failures.entry(operation).or_default().push_back(error);
    }

    /// Park the next call of `operation` until the returned gate is released.
    pub fn hold(&self, operation: Operation) -> Gate {
        self.add_gate(operation, None, GateStage::Request)
    }

    /// Park the next call of `operation` whose argument equals `argument`.
    pub fn hold_matching(&self, operation: Operation, argument: impl Into<String>) -> Gate {
        self.add_gate(operation, Some(argument.into()), GateStage::Request)
    }

    /// Compute the next answer of `operation` immediately but hold it back
    /// until the returned gate is released. Supported by `list_feed` and
    /// `search_posts`.
    pub fn hold_reply(&self, operation: Operation) -> Gate {
        self.add_gate(operation, None, GateStage::Reply)
    }

    fn add_gate(&self, operation: Operation, argument: Option<String>, stage: GateStage) -> Gate {
        let release = Arc::new(Semaphore::new(0));
        let (arrived_tx, arrived_rx) = watch::channel(false);
        self.hooks().gates.push(PendingGate {
            operation,
            argument,
            stage,
            release: Arc::clone(&release),
            arrived: arrived_tx,
        });
        Gate { release, arrived: arrived_rx }
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.hooks().calls.iter().filter(|call| call.operation == operation).count()
    }

    pub fn call_log(&self) -> Vec<CallRecord> {
        self.hooks().calls.clone()
    }

    /// Record the call, wait at a matching gate, then apply injected failures
    /// and the session check.
    async fn enter(&self, operation: Operation, argument: Option<String>) -> ServiceResult<()> {
        self.hooks().calls.push(CallRecord { operation, argument: argument.clone() });
        self.wait_at_gate(operation, argument.as_deref(), GateStage::Request).await;

        let injected = self.hooks().failures.get_mut(&operation).and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            debug!(%operation, error = %error, "injected failure");
            return Err(error);
        }
        if self.store().session_expired {
            return Err(ServiceError::unauthorized("session expired"));
        }
        Ok(())
    }

    /// Return an already computed answer, first waiting at a matching reply gate.
    async fn deliver<T>(
        &self,
        operation: Operation,
        argument: Option<String>,
        answer: T,
    ) -> ServiceResult<T> {
        self.wait_at_gate(operation, argument.as_deref(), GateStage::Reply).await;
        Ok(answer)
    }

    async fn wait_at_gate(&self, operation: Operation, argument: Option<&str>, stage: GateStage) {
        let gate = {
            let mut hooks = self.hooks();
            let matching = hooks.gates.iter().position(|gate| {
                gate.operation == operation
                    && gate.stage == stage
                    && (gate.argument.is_none() || gate.argument.as_deref() == argument)
            });
            matching.map(|index| hooks.gates.remove(index))
        };

        if let Some(gate) = gate {
            debug!(%operation, argument = ?argument, ?stage, "call parked at gate");
            gate.arrived.send_replace(true);
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }
    }
}

impl RemoteContentService for InMemoryContentService {
    fn list_feed(&self, cursor: Option<Cursor>, limit: usize) -> RcsFuture<'_, FeedPage> {
        Box::pin(async move {
            let argument = cursor.as_ref().map(Cursor::to_string);
            self.enter(Operation::ListFeed, argument.clone()).await?;
            let page = {
                let store = self.store();
                let start = match &cursor {
                    None => 0,
                    Some(cursor) => {
                        store
                            .posts
                            .iter()
                            .position(|post| post.id.as_str() == cursor.as_str())
                            .ok_or_else(|| ServiceError::not_found(format!("cursor {cursor}")))?
                            + 1
                    }
                };
                let posts: Vec<Post> =
                    store.posts.iter().skip(start).take(limit).map(|post| store.view(post)).collect();
                let has_more = start + posts.len() < store.posts.len();
                FeedPage::from_posts(posts, has_more)
            };
            self.deliver(Operation::ListFeed, argument, page).await
        })
    }

    fn search_posts(&self, term: String) -> RcsFuture<'_, Vec<Post>> {
        Box::pin(async move {
            self.enter(Operation::SearchPosts, Some(term.clone())).await?;
            let needle = term.to_lowercase();
            let posts: Vec<Post> = {
                let store = self.store();
                store
                    .posts
                    .iter()
                    .filter(|post| {
                        post.caption.to_lowercase().contains(&needle)
                            || post.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
                    })
                    .map(|post| store.view(post))
                    .collect()
            };
            self.deliver(Operation::SearchPosts, Some(term), posts).await
        })
    }

    fn get_post(&self, id: PostId) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.enter(Operation::GetPost, Some(id.to_string())).await?;
            let store = self.store();
            let index = store.position(&id)?;
            Ok(store.view(&store.posts[index]))
        })
    }

    fn set_likes(&self, post_id: PostId, liked_by: BTreeSet<UserId>) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.enter(Operation::SetLikes, Some(post_id.to_string())).await?;
            let mut store = self.store();
            let index = store.position(&post_id)?;
            store.posts[index].liked_by = liked_by;
            Ok(store.view(&store.posts[index]))
        })
    }

    fn create_save_record(&self, post_id: PostId, user_id: UserId) -> RcsFuture<'_, SaveRecord> {
        Box::pin(async move {
            self.enter(Operation::CreateSaveRecord, Some(post_id.to_string())).await?;
            let mut store = self.store();
            store.position(&post_id)?;
            store.next_save += 1;
            let id = SaveRecordId::new(format!("save-{}", store.next_save));
            store.saves.insert(id.clone(), StoredSave { post_id: post_id.clone(), user_id });
            Ok(SaveRecord { id, post_id })
        })
    }

    fn delete_save_record(&self, record_id: SaveRecordId) -> RcsFuture<'_, ()> {
        Box::pin(async move {
            self.enter(Operation::DeleteSaveRecord, Some(record_id.to_string())).await?;
            self.store()
                .saves
                .remove(&record_id)
                .map(|_| ())
                .ok_or_else(|| ServiceError::not_found(format!("save record {record_id}")))
        })
    }

    fn get_current_user(&self) -> RcsFuture<'_, User> {
        Box::pin(async move {
            self.enter(Operation::GetCurrentUser, None).await?;
            let store = self.store();
            let viewer =
                store.viewer.clone().ok_or_else(|| ServiceError::unauthorized("no session"))?;
            store.user(&viewer)
        })
    }

    fn list_recent_posts(&self, limit: usize) -> RcsFuture<'_, Vec<Post>> {
        Box::pin(async move {
            self.enter(Operation::ListRecentPosts, None).await?;
            let store = self.store();
            Ok(store.posts.iter().take(limit).map(|post| store.view(post)).collect())
        })
    }

    fn list_users(&self, limit: usize) -> RcsFuture<'_, Vec<User>> {
        Box::pin(async move {
            self.enter(Operation::ListUsers, None).await?;
            let store = self.store();
            Ok(store.users.values().take(limit).map(|user| store.compose_user(user)).collect())
        })
    }

    fn get_user(&self, id: UserId) -> RcsFuture<'_, User> {
        Box::pin(async move {
            self.enter(Operation::GetUser, Some(id.to_string())).await?;
            self.store().user(&id)
        })
    }

    fn create_post(&self, post: NewPost) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.enter(Operation::CreatePost, None).await?;
            let mut store = self.store();
            let now = Utc::now();
            let created_at = match store.posts.first() {
                Some(newest) if newest.created_at >= now => {
                    newest.created_at + Duration::milliseconds(1)
                }
                _ => now,
            };
            let created = Post {
                id: PostId::new(Uuid::new_v4().to_string()),
                creator_id: post.creator_id,
                caption: post.caption,
                tags: post.tags,
                image_ref: post.image_ref,
                location: post.location,
                created_at,
                liked_by: BTreeSet::new(),
                save_record_id: None,
            };
            store.posts.insert(0, created.clone());
            Ok(created)
        })
    }

    fn update_post(&self, update: PostUpdate) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.enter(Operation::UpdatePost, Some(update.post_id.to_string())).await?;
            let mut store = self.store();
            let index = store.position(&update.post_id)?;
            let post = &mut store.posts[index];
            post.caption = update.caption;
            post.image_ref = update.image_ref;
            post.location = update.location;
            post.tags = update.tags;
            Ok(store.view(&store.posts[index]))
        })
    }

    fn delete_post(&self, id: PostId) -> RcsFuture<'_, ()> {
        Box::pin(async move {
            self.enter(Operation::DeletePost, Some(id.to_string())).await?;
            let mut store = self.store();
            let index = store.position(&id)?;
            store.posts.remove(index);
            store.saves.retain(|_, save| save.post_id != id);
            Ok(())
        })
    }

    fn update_user(&self, update: ProfileUpdate) -> RcsFuture<'_, User> {
        Box::pin(async move {
            self.enter(Operation::UpdateUser, Some(update.user_id.to_string())).await?;
            let mut store = self.store();
            let user = store
                .users
                .get_mut(&update.user_id)
                .ok_or_else(|| ServiceError::not_found(format!("user {}", update.user_id)))?;
            user.name = update.name;
            user.bio = update.bio;
            user.image_url = update.image_url;
            store.user(&update.user_id)
        })
    }
}

// ── Demo data ──────────────────────────────────────────────────────

const DEMO_CAPTIONS: &[(&str, &str)] = &[
    ("Sunrise over the harbor", "travel, morning"),
    ("Street food night market", "food, travel"),
    ("Mountain trail after the rain", "hiking, nature"),
    ("Cat asleep on the keyboard", "cats, home"),
    ("Film roll from the coast", "film, photography"),
    ("First loaf of sourdough", "food, baking"),
    ("City lights from the rooftop", "city, night"),
];

pub fn demo_users() -> Vec<User> {
    [("u-ana", "Ana Ruiz", "ana"), ("u-ben", "Ben Okafor", "ben"), ("u-chloe", "Chloe Park", "chloe")]
        .into_iter()
        .map(|(id, name, username)| User {
            id: UserId::new(id),
            name: name.into(),
            username: username.into(),
            email: Some(format!("{username}@example.com")),
            image_url: None,
            bio: String::new(),
            saves: Vec::new(),
            liked: Vec::new(),
        })
        .collect()
}

/// `count` posts with ids `post-01..`, each one hour newer than the previous.
pub fn demo_posts(users: &[User], count: usize) -> Vec<Post> {
    (1..=count)
        .map(|index| {
            let (caption, tags) = DEMO_CAPTIONS[index % DEMO_CAPTIONS.len()];
            let creator = users
                .get(index % users.len().max(1))
                .map(|user| user.id.clone())
                .unwrap_or_else(|| UserId::new("u-unknown"));
            Post {
                id: PostId::new(format!("post-{index:02}")),
                creator_id: creator,
                caption: format!("{caption} #{index}"),
                tags: snapfeed_common::types::parse_tags(tags),
                image_ref: Some(format!("images/post-{index:02}.jpg")),
                location: None,
                created_at: DateTime::from_timestamp(DEMO_EPOCH_SECS + index as i64 * 3600, 0)
                    .unwrap_or_default(),
                liked_by: BTreeSet::new(),
                save_record_id: None,
            }
        })
        .collect()
}
