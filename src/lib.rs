//! # postcache - normalized client-side cache for a posts REST backend
//!
//! postcache keeps a local, normalized copy of server data consistent across
//! queries and mutations. It is built the way Elm-architecture applications
//! consume data: queries are [`Subscription`](subscription::Subscription)
//! sources, mutations are [`Command`](command::Command)s.
//!
//! ## Architecture
//!
//! 1. **Entity store**: [`EntityState`](entity::EntityState) holds entities by id
//!    plus an ordered id list, changed only through an [`EntityAdapter`](entity::EntityAdapter)
//! 2. **Query cache**: [`QueryClient`](http::QueryClient) caches results per
//!    `(endpoint, argument)`, shares in-flight requests and tracks which tags
//!    each entry provides
//! 3. **Invalidation**: mutations invalidate tags; subscribed queries refetch,
//!    the rest refetch on next access
//! 4. **Optimistic updates**: a [`Speculation`](http::Speculation) patches
//!    cached data before the server answers and rolls back on failure
//! 5. **Selectors**: [`EntitySelectors`](entity::EntitySelectors) derive memoized views
//!
//! ## Core Components
//!
//! - [`PostsApi`](posts::PostsApi): the posts endpoints over a shared client
//! - [`QueryClient`](http::QueryClient): cache, de-duplication and invalidation
//! - [`Transport`](http::Transport): the HTTP seam, with `reqwest` and in-memory implementations
//! - [`SubscriptionManager`](subscription::SubscriptionManager): runs query subscriptions
//!
//! ## Example
//!
//! ```rust,no_run
//! use postcache::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), QueryError> {
//! let client = Arc::new(QueryClient::new());
//! let api = PostsApi::new(client, MockBackend::new());
//!
//! let created = api.add_post(NewPost::new("Hello", "First post", 1)).await?;
//! api.get_posts().await?;
//!
//! // Shows up in the cache right away, rolled back if the server refuses
//! api.react(created.id.clone(), ReactionKind::ThumbsUp).await?;
//!
//! let selectors = EntitySelectors::new();
//! let posts = selectors.select_all(&api.posts_state());
//! assert_eq!(posts[0].reactions.thumbs_up, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `http-client` (default): [`HttpTransport`](http::HttpTransport) backed by `reqwest`

pub mod command;
pub mod entity;
pub mod http;
pub mod posts;
pub mod prelude;
pub mod subscription;
