//! Speculative writes into cached query data.
//!
//! An optimistic mutation changes the cache before the server confirms it:
//!
//! 1. **apply**: snapshot the part of the cached value being changed, then write the new value
//! 2. **commit**: the server accepted the write, drop the snapshot
//! 3. **rollback**: the server rejected it, restore the snapshot
//!
//! The part being changed is described by a [`Lens`], so any field of any
//! cached value can be patched the same way.
//!
//! # Example
//!
//! ```rust,ignore
//! let lens = Lens::new(
//!     move |posts: &EntityState<Post>| posts.get(&id).map(|post| post.reactions.clone()),
//!     move |posts: &mut EntityState<Post>, reactions| {
//!         adapter.update_one(posts, &id, |post| post.reactions = reactions);
//!     },
//! );
//!
//! let speculation = Speculation::apply(&client, &key, lens, new_reactions);
//! let result = send_to_server().await;
//! if let Some(speculation) = speculation {
//!     speculation.settle(&result);
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::cache::CacheKey;
use super::query::QueryClient;

/// Reads and writes one part `S` of a cached value `V`.
pub struct Lens<V, S> {
    get: Arc<dyn Fn(&V) -> Option<S> + Send + Sync>,
    set: Arc<dyn Fn(&mut V, S) + Send + Sync>,
}

impl<V, S> Lens<V, S> {
    /// `get` returns `None` when the part does not exist in the value (e.g. an unknown id).
    pub fn new<G, W>(get: G, set: W) -> Self
    where
        G: Fn(&V) -> Option<S> + Send + Sync + 'static,
        W: Fn(&mut V, S) + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }
}

impl<V, S> Clone for Lens<V, S> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

/// A write applied to cached data that can still be undone.
#[must_use = "settle, commit or rollback the speculation"]
pub struct Speculation<V, S> {
    client: QueryClient,
    key: CacheKey,
    lens: Lens<V, S>,
    prior: S,
}

impl<V, S> Speculation<V, S>
where
    V: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Snapshots the current value of the lens and writes `value` in its place.
    ///
    /// Returns `None` (and changes nothing) when `key` holds no `V` or the lens finds nothing.
    pub fn apply(client: &QueryClient, key: &CacheKey, lens: Lens<V, S>, value: S) -> Option<Self> {
        let prior = client
            .update_data::<V, _>(key, |data| {
                let prior = (lens.get)(data)?;
                (lens.set)(data, value);
                Some(prior)
            })?;

        debug!(key = %key, "applied optimistic update");
        Some(Self {
            client: client.clone(),
            key: key.clone(),
            lens,
            prior,
        })
    }

    /// Keeps the speculative value.
    pub fn commit(self) {
        debug!(key = %self.key, "committed optimistic update");
    }

    /// Restores the snapshot. Returns `false` if the entry or the part no longer exists.
    pub fn rollback(self) -> bool {
        let Self {
            client,
            key,
            lens,
            prior,
        } = self;

        let restored = client
            .update_data::<V, _>(&key, |data| {
                (lens.get)(data)?;
                (lens.set)(data, prior);
                Some(())
            })
            .is_some();

        warn!(key = %key, restored, "rolled back optimistic update");
        restored
    }

    /// Commits on `Ok`, rolls back on `Err`.
    pub fn settle<T, E>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.commit(),
            Err(_) => {
                self.rollback();
            }
        }
    }

    /// The value that was replaced.
    pub const fn prior(&self) -> &S {
        &self.prior
    }
}

impl<V, S: fmt::Debug> fmt::Debug for Speculation<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Speculation")
            .field("key", &self.key)
            .field("prior", &self.prior)
            .finish_non_exhaustive()
    }
}
