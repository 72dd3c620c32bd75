// Feed session: the client facade the UI layer talks to.
//
// Owns one query cache and wires every component to it: the feed paginator,
// the search stream, and the mutation coordinator. There is no global state;
// two sessions never share a cache.

pub mod views;

use std::future::Future;
use std::sync::Arc;

use snapfeed_common::types::{NewPost, Post, PostId, PostUpdate, ProfileUpdate, User, UserId};
use snapfeed_common::{ServiceError, ServiceResult};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::auth::{AuthMonitor, AuthState};
use crate::cache::{CacheEvent, CacheKey, Cacheable, KeyPattern, QueryCache};
use crate::config::{session_token_from_env, ClientConfig};
use crate::error::ClientError;
use crate::invalidation::{InvalidationGraph, MutationKind, MutationTarget};
use crate::mutation::{
    like_toggle, save_toggle, FieldValue, MutationCoordinator, MutationEvent, MutationTicket,
    PatchKey, SaveState, Seed,
};
use crate::pagination::{FeedPaginator, LoadOutcome};
use crate::rcs::{HttpContentService, RemoteContentService};
use crate::search::{SearchDebounceConfig, SearchEvent, SearchStream};

pub use views::{FeedView, LikeToggle, SaveToggle, SearchView};

/// Posts shown on the home screen.
const RECENT_POSTS_LIMIT: usize = 20;
/// Profiles listed on the people screen.
const USERS_LIMIT: usize = 10;

pub struct FeedSession {
    rcs: Arc<dyn RemoteContentService>,
    cache: QueryCache,
    auth: AuthMonitor,
    coordinator: MutationCoordinator,
    paginator: Arc<FeedPaginator>,
    search: SearchStream,
}

impl FeedSession {
    /// Build a session over `rcs`. Must be called within a Tokio runtime.
    pub fn new(rcs: Arc<dyn RemoteContentService>, config: &ClientConfig) -> Self {
        let cache = QueryCache::with_max_age(config.cache.max_age());
        let auth = AuthMonitor::new();
        let coordinator =
            MutationCoordinator::new(cache.clone(), InvalidationGraph::standard(), auth.clone());
        let paginator =
            Arc::new(FeedPaginator::new(cache.clone(), Arc::clone(&rcs), config.feed.page_size()));
        let search = SearchStream::new(
            cache.clone(),
            Arc::clone(&rcs),
            auth.clone(),
            Some(Arc::clone(&paginator)),
            SearchDebounceConfig::with_millis(config.search.debounce_ms),
        );
        Self { rcs, cache, auth, coordinator, paginator, search }
    }

    /// Build a session and load the signed-in user.
    ///
    /// An `Unauthorized` rejection still yields the session, with
    /// `auth_state()` already `Expired` so the UI can send the user to
    /// sign-in. Any other failure is returned.
    pub async fn connect(
        rcs: Arc<dyn RemoteContentService>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let session = Self::new(rcs, config);
        match session.current_user().await {
            Ok(user) => {
                info!(user_id = %user.id, "session connected");
                Ok(session)
            }
            Err(error) if error.is_unauthorized() => Ok(session),
            Err(error) => Err(error),
        }
    }

    /// Connect over HTTP using the configured service and the session token
    /// from the environment.
    pub async fn connect_http(config: &ClientConfig) -> Result<Self, ClientError> {
        let rcs = HttpContentService::from_config(&config.service, session_token_from_env())?;
        Self::connect(Arc::new(rcs), config).await
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn paginator(&self) -> &FeedPaginator {
        &self.paginator
    }

    pub fn search(&self) -> &SearchStream {
        &self.search
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn subscribe_auth(&self) -> watch::Receiver<AuthState> {
        self.auth.subscribe()
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub fn subscribe_mutations(&self) -> broadcast::Receiver<MutationEvent> {
        self.coordinator.subscribe()
    }

    pub fn subscribe_search(&self) -> broadcast::Receiver<SearchEvent> {
        self.search.subscribe()
    }

    fn observe(&self, error: ServiceError) -> ClientError {
        self.auth.report(&error);
        ClientError::Service(error)
    }

    async fn read<T, F, Fut>(&self, key: CacheKey, load: F) -> Result<T, ClientError>
    where
        T: Cacheable,
        F: FnOnce(Arc<dyn RemoteContentService>) -> Fut,
        Fut: Future<Output = ServiceResult<T>> + Send + 'static,
    {
        let rcs = Arc::clone(&self.rcs);
        self.cache.read(key, move || load(rcs)).await.map_err(|error| self.observe(error))
    }

    // ── Feed ───────────────────────────────────────────────────────

    /// The loaded feed with optimistic like changes applied.
    pub fn use_feed(&self) -> FeedView {
        FeedView {
            posts: self.overlay(self.paginator.items()),
            status: self.paginator.status(),
            has_more: self.paginator.has_more(),
            suspended: self.paginator.is_suspended(),
        }
    }

    /// The consumer scrolled near the end of the loaded feed.
    pub async fn load_more(&self) -> Result<LoadOutcome, ClientError> {
        self.paginator.load_next().await.map_err(|error| self.observe(error))
    }

    /// Drop the loaded feed and fetch its first page again from the service.
    pub async fn refresh(&self) -> Result<LoadOutcome, ClientError> {
        self.cache.invalidate_pattern(&KeyPattern::AllFeed);
        self.paginator.reset();
        self.load_more().await
    }

    /// Refetch whatever the last mutations made stale: loaded feed pages and
    /// the active search. Returns whether the feed pages were replaced.
    pub async fn revalidate(&self) -> Result<bool, ClientError> {
        let searched = self.search.revalidate();
        if searched {
            debug!("active search re-issued");
        }
        self.paginator.revalidate().await.map_err(|error| self.observe(error))
    }

    // ── Search ─────────────────────────────────────────────────────

    /// Render-time hook: feeds `term` to the search stream when it changed
    /// and returns the current search state.
    pub fn use_search(&self, term: &str) -> SearchView {
        if term.trim() != self.search.term() {
            self.search.on_input(term);
        }
        self.search_view()
    }

    pub fn search_view(&self) -> SearchView {
        let active = self.search.active();
        SearchView {
            term: self.search.term(),
            generation: active.map_or_else(|| self.search.generation(), |session| session.generation),
            status: self.search.status(),
            posts: self.search.results().map(|posts| self.overlay(posts)),
        }
    }

    // ── Likes ──────────────────────────────────────────────────────

    fn viewer(&self) -> Option<UserId> {
        self.cache.peek::<User>(&CacheKey::CurrentUser).map(|user| user.id)
    }

    fn like_seed(&self, post_id: &PostId) -> Result<Seed, ClientError> {
        let (post, revision) = self
            .cache
            .find_post(post_id)
            .ok_or_else(|| ClientError::NotLoaded(format!("post {post_id}")))?;
        Ok(Seed { value: FieldValue::LikedBy(post.liked_by), revision })
    }

    pub fn use_like_toggle(&self, post_id: &PostId) -> Result<LikeToggle, ClientError> {
        let seed = self.like_seed(post_id)?;
        let field = self.coordinator.view(&PatchKey::liked_by(post_id.clone()), &seed);
        Ok(LikeToggle::from_field(post_id.clone(), self.viewer().as_ref(), field))
    }

    /// Like or unlike a post as the signed-in user. The displayed value
    /// changes immediately; the ticket resolves once the service answers.
    pub fn toggle_like(&self, post_id: &PostId) -> Result<MutationTicket, ClientError> {
        let viewer = self.viewer().ok_or(ClientError::NoCurrentUser)?;
        let seed = self.like_seed(post_id)?;
        Ok(self.coordinator.apply(like_toggle(Arc::clone(&self.rcs), post_id.clone(), viewer, seed)))
    }

    // ── Saves ──────────────────────────────────────────────────────

    /// The viewer's save state, from the current user's save records when
    /// loaded, else from the post itself.
    fn save_seed(&self, post_id: &PostId) -> Result<Seed, ClientError> {
        if let Some(entry) = self.cache.get(&CacheKey::CurrentUser) {
            if let Some(user) = User::from_value(&entry.value) {
                let state = user
                    .save_record_for(post_id)
                    .map_or(SaveState::NotSaved, |record| SaveState::Saved(record.id.clone()));
                return Ok(Seed { value: FieldValue::Saved(state), revision: entry.revision });
            }
        }
        let (post, revision) = self
            .cache
            .find_post(post_id)
            .ok_or_else(|| ClientError::NotLoaded(format!("post {post_id}")))?;
        let state = post.save_record_id.map_or(SaveState::NotSaved, SaveState::Saved);
        Ok(Seed { value: FieldValue::Saved(state), revision })
    }

    pub fn use_save_toggle(&self, post_id: &PostId) -> Result<SaveToggle, ClientError> {
        let seed = self.save_seed(post_id)?;
        let field = self.coordinator.view(&PatchKey::saved(post_id.clone()), &seed);
        Ok(SaveToggle::from_field(post_id.clone(), field))
    }

    pub fn toggle_save(&self, post_id: &PostId) -> Result<MutationTicket, ClientError> {
        let viewer = self.viewer().ok_or(ClientError::NoCurrentUser)?;
        let seed = self.save_seed(post_id)?;
        Ok(self.coordinator.apply(save_toggle(Arc::clone(&self.rcs), post_id.clone(), viewer, seed)))
    }

    /// Apply pending and confirmed like changes to posts read from the cache.
    fn overlay(&self, mut posts: Vec<Post>) -> Vec<Post> {
        for post in &mut posts {
            let revision = self.cache.find_post(&post.id).map_or(0, |(_, revision)| revision);
            let seed = Seed { value: FieldValue::LikedBy(post.liked_by.clone()), revision };
            let field = self.coordinator.view(&PatchKey::liked_by(post.id.clone()), &seed);
            if let FieldValue::LikedBy(liked_by) = field.value {
                post.liked_by = liked_by;
            }
        }
        posts
    }

    // ── Entity reads ───────────────────────────────────────────────

    pub async fn current_user(&self) -> Result<User, ClientError> {
        self.read(CacheKey::CurrentUser, |rcs| async move { rcs.get_current_user().await }).await
    }

    /// Ids of the posts the signed-in user has liked.
    pub async fn liked_posts(&self) -> Result<Vec<PostId>, ClientError> {
        Ok(self.current_user().await?.liked)
    }

    pub async fn post(&self, id: &PostId) -> Result<Post, ClientError> {
        let id = id.clone();
        let post: Post = self
            .read(CacheKey::Post(id.clone()), move |rcs| async move { rcs.get_post(id).await })
            .await?;
        Ok(self.overlay(vec![post.clone()]).pop().unwrap_or(post))
    }

    pub async fn recent_posts(&self) -> Result<Vec<Post>, ClientError> {
        let posts: Vec<Post> = self
            .read(CacheKey::RecentPosts, |rcs| async move {
                rcs.list_recent_posts(RECENT_POSTS_LIMIT).await
            })
            .await?;
        Ok(self.overlay(posts))
    }

    pub async fn users(&self) -> Result<Vec<User>, ClientError> {
        self.read(CacheKey::Users, |rcs| async move { rcs.list_users(USERS_LIMIT).await }).await
    }

    pub async fn user(&self, id: &UserId) -> Result<User, ClientError> {
        let id = id.clone();
        self.read(CacheKey::User(id.clone()), move |rcs| async move { rcs.get_user(id).await }).await
    }

    // ── Authoring ──────────────────────────────────────────────────

    pub async fn create_post(&self, post: NewPost) -> Result<Post, ClientError> {
        let created = self
            .coordinator
            .run_remote(MutationKind::CreatePost, MutationTarget::default(), self.rcs.create_post(post))
            .await?;
        Ok(created)
    }

    pub async fn update_post(&self, update: PostUpdate) -> Result<Post, ClientError> {
        let target = MutationTarget::post(update.post_id.clone());
        let updated = self
            .coordinator
            .run_remote(MutationKind::UpdatePost, target, self.rcs.update_post(update))
            .await?;
        Ok(updated)
    }

    pub async fn delete_post(&self, id: &PostId) -> Result<(), ClientError> {
        self.coordinator
            .run_remote(
                MutationKind::DeletePost,
                MutationTarget::post(id.clone()),
                self.rcs.delete_post(id.clone()),
            )
            .await?;
        Ok(())
    }

    pub async fn update_user(&self, update: ProfileUpdate) -> Result<User, ClientError> {
        let target = MutationTarget::user(update.user_id.clone());
        let user = self
            .coordinator
            .run_remote(MutationKind::UpdateUser, target, self.rcs.update_user(update))
            .await?;
        Ok(user)
    }
}
