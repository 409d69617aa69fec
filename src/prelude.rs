//! Prelude module for convenient imports.
//!
//! ```
//! use postcache::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`PostsApi`] and the post model types
//! - [`QueryClient`], [`Query`] and their result types
//! - [`EntityState`], [`EntityAdapter`] and [`EntitySelectors`]
//! - [`Command`] and [`Subscription`]

pub use crate::command::Command;
pub use crate::entity::{Entity, EntityAdapter, EntitySelectors, EntityState};
pub use crate::http::{
    ApiConfig, MockBackend, Mutation, MutationResult, Query, QueryClient, QueryConfig, QueryError,
    QueryResult, QueryState, Tag, TagKind,
};
pub use crate::posts::{NewPost, Post, PostId, PostsApi, ReactionKind, Reactions};
pub use crate::subscription::{Subscription, SubscriptionManager};
