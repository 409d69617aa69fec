//! Posts served by a json-server style backend.
//!
//! [`PostsApi`] defines the cached endpoints:
//!
//! | Endpoint | Request | Provides | Invalidates |
//! |---|---|---|---|
//! | `getPosts` | `GET /posts` | `{Post, LIST}`, `{Post, id}` | |
//! | `getPostsByUserId` | `GET /posts?userId=` | `{Post, id}` | |
//! | `addNewPost` | `POST /posts` | | `{Post, LIST}` |
//! | `updatePost` | `PUT /posts/{id}` | | `{Post, id}` |
//! | `deletePost` | `DELETE /posts/{id}` | | `{Post, id}` |
//! | `addReaction` | `PATCH /posts/{id}` | | optimistic, none |
//!
//! List responses are normalized by [`transform_posts`] and stored as an
//! [`EntityState`](crate::entity::EntityState) sorted newest first.

pub mod api;
pub mod model;
pub mod transform;

pub use api::{PostsApi, posts_adapter};
pub use model::{NewPost, Post, PostId, RawPost, ReactionKind, Reactions};
pub use transform::{newest_first, transform_post, transform_posts};
