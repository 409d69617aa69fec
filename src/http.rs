//! HTTP queries and mutations over a shared, tag-invalidated cache.
//!
//! This module provides subscription-based queries and command-based mutations,
//! similar to RTK Query or TanStack Query.
//!
//! # Features
//!
//! - **Queries**: cached fetches keyed by endpoint and argument, with in-flight de-duplication
//! - **Tags**: queries provide tags, mutations invalidate them, subscribers refetch
//! - **Mutations**: `Command`-based writes, optionally applied speculatively with rollback
//! - **Transports**: `reqwest` for real servers, [`MockBackend`] for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use postcache::http::{Query, QueryClient, Tag, TagKind};
//! use std::sync::Arc;
//!
//! struct App {
//!     api: PostsApi,
//!     posts: QueryState<EntityState<Post>>,
//! }
//!
//! impl App {
//!     fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!         vec![Subscription::new(self.api.posts_query()).map(Message::PostsQuery)]
//!     }
//!
//!     fn update(&mut self, msg: Message) -> Command<Message> {
//!         match msg {
//!             Message::PostsQuery(result) => {
//!                 self.posts = result.state;
//!                 Command::none()
//!             }
//!             Message::PostSaved(id) => {
//!                 self.api.client().invalidate(vec![Tag::id(TagKind::Post, id)])
//!             }
//!         }
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod mock;
pub mod mutation;
pub mod optimistic;
pub mod query;
pub mod tags;
pub mod transport;

pub use cache::{CacheEntry, CacheKey, QueryStatus};
pub use config::{ApiConfig, ConfigError, QueryConfig};
pub use mock::MockBackend;
pub use mutation::{Mutation, MutationResult, MutationState};
pub use optimistic::{Lens, Speculation};
pub use query::{CacheEvent, Query, QueryClient, QueryDefinition, QueryError, QueryResult, QueryState};
pub use tags::{Tag, TagId, TagKind};
#[cfg(feature = "http-client")]
pub use transport::HttpTransport;
pub use transport::{ApiRequest, Method, Transport};
