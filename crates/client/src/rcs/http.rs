// HTTP adapter for the remote content service.
//
// JSON over REST with a bearer session token. Non-2xx responses carry an
// `{"error": {"code", "message"}}` envelope, mapped onto `ServiceError`.

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use snapfeed_common::protocol::rest::{
    self, CreateSaveBody, CreatedSave, DocumentList, ErrorEnvelope, SetLikesBody,
};
use snapfeed_common::types::{
    Cursor, FeedPage, NewPost, Post, PostId, PostUpdate, ProfileUpdate, SaveRecord, SaveRecordId,
    User, UserId,
};
use snapfeed_common::{ServiceError, ServiceResult};
use tracing::debug;
use url::Url;

use super::{RcsFuture, RemoteContentService};
use crate::config::ServiceConfig;
use crate::error::ClientError;

pub struct HttpContentService {
    http: reqwest::Client,
    base_url: Url,
    session_token: Option<String>,
}

impl HttpContentService {
    pub fn new(
        base_url: Url,
        session_token: Option<String>,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ServiceError::network(format!("http client: {error}")))?;
        Ok(Self { http, base_url: with_trailing_slash(base_url), session_token })
    }

    pub fn from_config(
        config: &ServiceConfig,
        session_token: Option<String>,
    ) -> Result<Self, ClientError> {
        let url = config.url()?;
        Ok(Self::new(url, session_token, config.request_timeout())?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> ServiceResult<Url> {
        self.base_url
            .join(path)
            .map_err(|error| ServiceError::network(format!("invalid request path `{path}`: {error}")))
    }

    /// URL of a route given as segments, each percent-encoded as one path
    /// segment. `.` and `..` would be dropped by the URL parser, so an id
    /// equal to either (or empty) cannot name a resource.
    fn route_url(&self, segments: &[&str]) -> ServiceResult<Url> {
        if let Some(bad) = segments.iter().find(|segment| matches!(**segment, "" | "." | "..")) {
            return Err(ServiceError::not_found(format!("no resource with id `{bad}`")));
        }
        let mut url = self.base_url.clone();
        let cannot_be_base =
            || ServiceError::network(format!("base url `{}` cannot hold a path", self.base_url));
        url.path_segments_mut().map_err(|()| cannot_be_base())?.pop_if_empty().extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> ServiceResult<RequestBuilder> {
        let url = self.url(path)?;
        Ok(self.request_url(method, url))
    }

    fn request_route(&self, method: Method, segments: &[&str]) -> ServiceResult<RequestBuilder> {
        let url = self.route_url(segments)?;
        Ok(self.request_url(method, url))
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "content service request");
        let builder = self.http.request(method, url);
        match &self.session_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ServiceResult<T> {
        let response = check_status(builder.send().await.map_err(transport_error)?).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| ServiceError::network(format!("invalid response body: {error}")))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> ServiceResult<()> {
        check_status(builder.send().await.map_err(transport_error)?).await?;
        Ok(())
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::network(format!("request timed out: {error}"))
    } else {
        ServiceError::network(error.to_string())
    }
}

async fn check_status(response: Response) -> ServiceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let envelope = serde_json::from_slice::<ErrorEnvelope>(&body).ok();
    Err(rest::error_for_status(status.as_u16(), envelope.as_ref()))
}

/// The list endpoint reports no explicit continuation flag; a full page
/// implies there may be more.
fn feed_page(documents: Vec<Post>, limit: usize) -> FeedPage {
    let has_more = limit > 0 && documents.len() >= limit;
    FeedPage::from_posts(documents, has_more)
}

impl RemoteContentService for HttpContentService {
    fn list_feed(&self, cursor: Option<Cursor>, limit: usize) -> RcsFuture<'_, FeedPage> {
        Box::pin(async move {
            let mut query = vec![("limit", limit.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.to_string()));
            }
            let builder = self.request(Method::GET, rest::POSTS)?.query(&query);
            let list: DocumentList<Post> = self.send_json(builder).await?;
            Ok(feed_page(list.documents, limit))
        })
    }

    fn search_posts(&self, term: String) -> RcsFuture<'_, Vec<Post>> {
        Box::pin(async move {
            let builder = self.request(Method::GET, rest::POSTS_SEARCH)?.query(&[("q", term)]);
            let list: DocumentList<Post> = self.send_json(builder).await?;
            Ok(list.documents)
        })
    }

    fn get_post(&self, id: PostId) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.send_json(self.request_route(Method::GET, &rest::post_route(&id))?).await
        })
    }

    fn set_likes(&self, post_id: PostId, liked_by: BTreeSet<UserId>) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            let body = SetLikesBody { liked_by: liked_by.into_iter().collect() };
            let builder =
                self.request_route(Method::PATCH, &rest::post_likes_route(&post_id))?.json(&body);
            self.send_json(builder).await
        })
    }

    fn create_save_record(&self, post_id: PostId, user_id: UserId) -> RcsFuture<'_, SaveRecord> {
        Box::pin(async move {
            let body = CreateSaveBody { post_id: post_id.clone(), user_id };
            let builder = self.request(Method::POST, rest::SAVES)?.json(&body);
            let created: CreatedSave = self.send_json(builder).await?;
            Ok(SaveRecord { id: created.record_id, post_id })
        })
    }

    fn delete_save_record(&self, record_id: SaveRecordId) -> RcsFuture<'_, ()> {
        Box::pin(async move {
            self.send_empty(self.request_route(Method::DELETE, &rest::save_route(&record_id))?).await
        })
    }

    fn get_current_user(&self) -> RcsFuture<'_, User> {
        Box::pin(async move { self.send_json(self.request(Method::GET, rest::ACCOUNT_ME)?).await })
    }

    fn list_recent_posts(&self, limit: usize) -> RcsFuture<'_, Vec<Post>> {
        Box::pin(async move {
            let builder =
                self.request(Method::GET, rest::POSTS_RECENT)?.query(&[("limit", limit.to_string())]);
            let list: DocumentList<Post> = self.send_json(builder).await?;
            Ok(list.documents)
        })
    }

    fn list_users(&self, limit: usize) -> RcsFuture<'_, Vec<User>> {
        Box::pin(async move {
            let builder =
                self.request(Method::GET, rest::USERS)?.query(&[("limit", limit.to_string())]);
            let list: DocumentList<User> = self.send_json(builder).await?;
            Ok(list.documents)
        })
    }

    fn get_user(&self, id: UserId) -> RcsFuture<'_, User> {
        Box::pin(async move {
            self.send_json(self.request_route(Method::GET, &rest::user_route(&id))?).await
        })
    }

    fn create_post(&self, post: NewPost) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            self.send_json(self.request(Method::POST, rest::POSTS)?.json(&post)).await
        })
    }

    fn update_post(&self, update: PostUpdate) -> RcsFuture<'_, Post> {
        Box::pin(async move {
            let route = rest::post_route(&update.post_id);
            let builder = self.request_route(Method::PUT, &route)?.json(&update);
            self.send_json(builder).await
        })
    }

    fn delete_post(&self, id: PostId) -> RcsFuture<'_, ()> {
        Box::pin(async move {
            self.send_empty(self.request_route(Method::DELETE, &rest::post_route(&id))?).await
        })
    }

    fn update_user(&self, update: ProfileUpdate) -> RcsFuture<'_, User> {
        Box::pin(async move {
            let route = rest::user_route(&update.user_id);
            let builder = self.request_route(Method::PUT, &route)?.json(&update);
            self.send_json(builder).await
        })
    }
}
