//! Mutations: creating, updating or deleting resources.
//!
//! # Design Pattern: Transaction-based Operations
//!
//! Mutations use the **transaction-based** pattern. Each mutation operation
//! returns a `Command` because HTTP writes are discrete side effects with clear
//! start and end points. After a successful mutation the cache entries that
//! depend on the changed data are invalidated (see
//! [`QueryClient::invalidate`](super::QueryClient::invalidate)) or, for
//! optimistic mutations, patched in place (see [`Speculation`](super::Speculation)).
//!
//! # Example
//!
//! ```rust,ignore
//! use postcache::http::{Mutation, QueryError};
//!
//! enum Message {
//!     AddPost(NewPost),
//!     PostAdded(Result<Post, QueryError>),
//! }
//!
//! fn update(&mut self, msg: Message) -> Command<Message> {
//!     match msg {
//!         Message::AddPost(draft) => {
//!             let api = self.api.clone();
//!             Mutation::mutate(draft, move |draft| Box::pin(async move { api.add_post(draft).await }))
//!                 .map(Message::PostAdded)
//!         }
//!         Message::PostAdded(_) => Command::none(),
//!     }
//! }
//! ```

use std::marker::PhantomData;

use futures::future::BoxFuture;

use crate::command::Command;

use super::query::QueryError;

/// The state of a mutation result.
#[derive(Debug, Clone)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(String),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// A mutation that has not started.
    pub const fn idle() -> Self {
        Self {
            state: MutationState::Idle,
        }
    }

    /// A mutation waiting for the server.
    pub const fn loading() -> Self {
        Self {
            state: MutationState::Loading,
        }
    }

    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

impl<T> Default for MutationResult<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> From<Result<T, QueryError>> for MutationResult<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        let state = match result {
            Ok(data) => MutationState::Success(data),
            Err(e) => MutationState::Error(e.to_string()),
        };
        Self { state }
    }
}

/// A mutation for performing data modifications (POST, PUT, PATCH, DELETE).
///
/// Mutations are one-off operations that return a `Command`. Unlike queries,
/// they don't cache results.
pub struct Mutation<I, O> {
    _phantom: PhantomData<(I, O)>,
}

impl<I, O> Mutation<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Executes a mutation and returns a `Command`.
    ///
    /// The returned command produces `Result<O, QueryError>` which can be mapped
    /// to your application's message type using [`Command::map`].
    ///
    /// # Arguments
    ///
    /// * `input` - The input data for the mutation
    /// * `mutator` - An async function that performs the mutation
    pub fn mutate<F>(input: I, mutator: F) -> Command<Result<O, QueryError>>
    where
        F: FnOnce(I) -> BoxFuture<'static, Result<O, QueryError>> + Send + 'static,
    {
        Command::future(async move { mutator(input).await })
    }
}
