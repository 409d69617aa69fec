//! The posts endpoints: cached list queries and the mutations that keep them current.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::model::{NewPost, Post, PostId, ReactionKind, Reactions};
use super::transform::{decode_posts, newest_first, transform_post, transform_posts};
use crate::entity::{EntityAdapter, EntityState};
use crate::http::transport::{ApiRequest, Method, Transport};
use crate::http::{CacheKey, Lens, Query, QueryClient, QueryDefinition, QueryError, Speculation, Tag, TagKind};

pub const GET_POSTS: &str = "getPosts";
pub const GET_POSTS_BY_USER_ID: &str = "getPostsByUserId";
pub const ADD_NEW_POST: &str = "addNewPost";
pub const UPDATE_POST: &str = "updatePost";
pub const DELETE_POST: &str = "deletePost";
pub const ADD_REACTION: &str = "addReaction";

const POSTS_PATH: &str = "/posts";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The adapter every posts collection uses: newest first.
pub const fn posts_adapter() -> EntityAdapter<Post> {
    EntityAdapter::sorted(newest_first)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Submission<'a> {
    #[serde(flatten)]
    draft: &'a NewPost,
    date: DateTime<Utc>,
    reactions: Reactions,
}

/// Typed access to the posts backend through a shared [`QueryClient`].
///
/// Clones share the same client and transport.
///
/// # Example
///
/// ```rust,no_run
/// use postcache::http::{MockBackend, QueryClient};
/// use postcache::posts::{NewPost, PostsApi};
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), postcache::http::QueryError> {
/// let api = PostsApi::new(Arc::new(QueryClient::new()), MockBackend::new());
///
/// api.add_post(NewPost::new("Hello", "First post", 1)).await?;
/// let posts = api.get_posts().await?;
/// assert_eq!(posts.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostsApi {
    client: Arc<QueryClient>,
    transport: Arc<dyn Transport>,
    adapter: EntityAdapter<Post>,
    clock: Clock,
}

impl PostsApi {
    pub fn new(client: Arc<QueryClient>, transport: impl Transport) -> Self {
        Self {
            client,
            transport: Arc::new(transport),
            adapter: posts_adapter(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Connects to a real server.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NetworkError`] if the HTTP client cannot be built.
    #[cfg(feature = "http-client")]
    pub fn connect(
        client: Arc<QueryClient>,
        config: crate::http::ApiConfig,
    ) -> Result<Self, QueryError> {
        Ok(Self::new(client, crate::http::HttpTransport::new(config)?))
    }

    /// Replaces the clock used for synthetic and refreshed dates.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub const fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    pub const fn adapter(&self) -> &EntityAdapter<Post> {
        &self.adapter
    }

    pub fn posts_key() -> CacheKey {
        CacheKey::new(GET_POSTS, &())
    }

    pub fn posts_by_user_key(user_id: u64) -> CacheKey {
        CacheKey::new(GET_POSTS_BY_USER_ID, &user_id)
    }

    /// `GET /posts`, providing `{Post, LIST}` and `{Post, id}` for every post.
    pub fn posts_definition(&self) -> QueryDefinition<EntityState<Post>> {
        self.list_definition(Self::posts_key(), ApiRequest::get(POSTS_PATH))
            .provides_tags(|posts| {
                std::iter::once(Tag::list(TagKind::Post))
                    .chain(posts.ids().iter().map(|id| Tag::id(TagKind::Post, id)))
                    .collect()
            })
    }

    /// `GET /posts?userId={user_id}`, providing `{Post, id}` for every post.
    pub fn posts_by_user_definition(&self, user_id: u64) -> QueryDefinition<EntityState<Post>> {
        self.list_definition(
            Self::posts_by_user_key(user_id),
            ApiRequest::get(POSTS_PATH).query("userId", user_id),
        )
        .provides_tags(|posts| {
            posts
                .ids()
                .iter()
                .map(|id| Tag::id(TagKind::Post, id))
                .collect()
        })
    }

    fn list_definition(
        &self,
        key: CacheKey,
        request: ApiRequest,
    ) -> QueryDefinition<EntityState<Post>> {
        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let adapter = self.adapter;

        QueryDefinition::new(key, move || {
            let response = transport.send(request.clone());
            let clock = clock.clone();
            async move {
                let records = decode_posts(response.await?)?;
                let mut state = adapter.initial_state();
                adapter.set_all(&mut state, transform_posts(records, clock()));
                Ok::<_, QueryError>(state)
            }
            .boxed()
        })
    }

    /// All posts, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the transport or decode error of the fetch.
    pub async fn get_posts(&self) -> Result<EntityState<Post>, QueryError> {
        self.client.fetch(&self.posts_definition()).await
    }

    /// One author's posts, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the transport or decode error of the fetch.
    pub async fn get_posts_by_user(&self, user_id: u64) -> Result<EntityState<Post>, QueryError> {
        self.client
            .fetch(&self.posts_by_user_definition(user_id))
            .await
    }

    /// A subscription source tracking the full list.
    pub fn posts_query(&self) -> Query<EntityState<Post>> {
        Query::new(self.posts_definition(), self.client.clone())
    }

    /// A subscription source tracking one author's posts.
    pub fn posts_by_user_query(&self, user_id: u64) -> Query<EntityState<Post>> {
        Query::new(self.posts_by_user_definition(user_id), self.client.clone())
    }

    /// The cached full list, stale or not; empty when nothing was fetched yet.
    pub fn posts_state(&self) -> EntityState<Post> {
        self.client
            .data::<EntityState<Post>>(&Self::posts_key())
            .unwrap_or_default()
    }

    /// `POST /posts`, dated now with no reactions. Invalidates `{Post, LIST}`
    /// as soon as the server accepts the write.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`QueryError::DecodeError`] if the
    /// server's answer is not a post (the list is invalidated regardless).
    pub async fn add_post(&self, draft: NewPost) -> Result<Post, QueryError> {
        let now = (self.clock)();
        let body = encode(&Submission {
            draft: &draft,
            date: now,
            reactions: Reactions::default(),
        })?;

        let response = self
            .transport
            .send(ApiRequest::new(Method::Post, POSTS_PATH).json(body))
            .await?;
        self.client.invalidate_tags(&[Tag::list(TagKind::Post)]);

        let post = transform_post(response, now)?;
        debug!(endpoint = ADD_NEW_POST, id = %post.id, "post created");
        Ok(post)
    }

    /// `PUT /posts/{id}` with the whole post and a refreshed date. Invalidates
    /// `{Post, id}` as soon as the server accepts the write.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] if the post does not exist, the
    /// transport error, or [`QueryError::DecodeError`] if the answer is not a post.
    pub async fn update_post(&self, post: Post) -> Result<Post, QueryError> {
        let now = (self.clock)();
        let id = post.id.clone();
        let body = encode(&Post { date: now, ..post })?;

        let response = self
            .transport
            .send(ApiRequest::new(Method::Put, post_path(&id)).json(body))
            .await?;
        self.client.invalidate_tags(&[Tag::id(TagKind::Post, &id)]);

        let updated = transform_post(response, now)?;
        debug!(endpoint = UPDATE_POST, %id, "post updated");
        Ok(updated)
    }

    /// `DELETE /posts/{id}` with body `{id}`. Invalidates `{Post, id}`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] if the post does not exist, or the transport error.
    pub async fn delete_post(&self, id: PostId) -> Result<PostId, QueryError> {
        let body = json!({ "id": id });
        self.transport
            .send(ApiRequest::new(Method::Delete, post_path(&id)).json(body))
            .await?;
        debug!(endpoint = DELETE_POST, %id, "post deleted");
        self.client.invalidate_tags(&[Tag::id(TagKind::Post, &id)]);
        Ok(id)
    }

    /// Sets a post's reactions.
    ///
    /// The cached list shows `reactions` immediately. `PATCH /posts/{id}`
    /// follows; if it fails the cached reactions are restored to exactly
    /// what they were. Nothing is invalidated either way.
    ///
    /// # Errors
    ///
    /// Returns the transport error after rolling back.
    pub async fn add_reaction(&self, id: PostId, reactions: Reactions) -> Result<(), QueryError> {
        let speculation =
            Speculation::apply(&self.client, &Self::posts_key(), self.reactions_lens(&id), reactions);
        if speculation.is_none() {
            debug!(endpoint = ADD_REACTION, %id, "post not cached, sending without optimistic update");
        }

        let request = ApiRequest::new(Method::Patch, post_path(&id)).json(json!({ "reactions": reactions }));
        let result = self.transport.send(request).await.map(drop);

        if let Some(speculation) = speculation {
            speculation.settle(&result);
        }
        result
    }

    /// Adds one `kind` reaction to a cached post. Returns the reactions that were sent.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] if the post is not in the cached list,
    /// otherwise as [`add_reaction`](Self::add_reaction).
    pub async fn react(&self, id: PostId, kind: ReactionKind) -> Result<Reactions, QueryError> {
        let current = self
            .posts_state()
            .get(&id)
            .map(|post| post.reactions)
            .ok_or_else(|| QueryError::NotFound(format!("post {id} is not cached")))?;
        let next = current.incremented(kind);
        self.add_reaction(id, next).await?;
        Ok(next)
    }

    fn reactions_lens(&self, id: &PostId) -> Lens<EntityState<Post>, Reactions> {
        let adapter = self.adapter;
        let read = id.clone();
        let write = id.clone();
        Lens::new(
            move |posts: &EntityState<Post>| posts.get(&read).map(|post| post.reactions),
            move |posts: &mut EntityState<Post>, reactions| {
                adapter.update_one(posts, &write, |post| post.reactions = reactions);
            },
        )
    }
}

impl fmt::Debug for PostsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostsApi")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn post_path(id: &PostId) -> String {
    format!("{POSTS_PATH}/{id}")
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, QueryError> {
    serde_json::to_value(value).map_err(|e| QueryError::InvalidInput(e.to_string()))
}
