//! Cached queries, request de-duplication and tag invalidation.
//!
//! This module provides the [`QueryClient`], which owns every cached query
//! result, and the [`Query`] subscription that keeps a consumer in sync with
//! one cache entry.
//!
//! # Design Pattern: Subscription-based State Management
//!
//! Queries are **subscriptions** that continuously monitor and manage cached
//! data. When you subscribe to a query:
//!
//! 1. If cached data exists, it's immediately emitted
//! 2. If data is stale or missing, a fetch is automatically triggered
//! 3. When one of the entry's tags is invalidated, refetching happens automatically
//! 4. When cached data is patched in place (optimistic updates), the new data is re-emitted
//!
//! Calling [`QueryClient::fetch`] directly gives the same cache semantics
//! without a subscription; an invalidated entry that nobody subscribes to is
//! refetched lazily on its next `fetch`.
//!
//! # Example
//!
//! ```rust,ignore
//! use postcache::http::{Query, QueryClient, QueryDefinition, Tag, TagKind};
//! use std::sync::Arc;
//!
//! let client = Arc::new(QueryClient::new());
//! let users = QueryDefinition::new(CacheKey::new("getUsers", &()), || {
//!     Box::pin(fetch_users())
//! })
//! .provides_tags(|_| vec![Tag::list(TagKind::User)]);
//!
//! let subscription = Subscription::new(Query::new(users, client.clone()))
//!     .map(Message::UsersQuery);
//! ```

use std::any::Any;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::StreamExt;
use futures::future::{BoxFuture, Shared};
use futures::stream::{self, BoxStream};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::command::Command;
use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::cache::{CacheEntry, CacheKey, QueryStatus, StoredEntry};
use super::config::QueryConfig;
use super::tags::{Tag, TagIndex};

/// Error type for query and mutation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The server answered with a non-success status.
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// The request never produced a response.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The server reported that the resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The caller supplied input that cannot be sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The state of a query result.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
    /// Query is loading (fetching data).
    Loading,
    /// Query succeeded with data.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale and should be refetched.
        is_stale: bool,
    },
    /// Query failed with an error.
    Error(String),
}

/// A query result containing the current state.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    /// Returns the data if the query succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error(_))
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }
}

impl<T> From<Result<T, QueryError>> for QueryResult<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        let state = match result {
            Ok(data) => QueryState::Success {
                data,
                is_stale: false,
            },
            Err(e) => QueryState::Error(e.to_string()),
        };
        Self { state }
    }
}

/// Notification broadcast by the [`QueryClient`] about a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The entry was marked stale and should be refetched by its subscribers.
    Invalidated(CacheKey),
    /// The entry's data was changed in place.
    Updated(CacheKey),
}

type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;
type TagProvider<V> = Arc<dyn Fn(&V) -> Vec<Tag> + Send + Sync>;
type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

/// Everything needed to run one query: its cache key, how to fetch it and
/// which tags the fetched data provides.
pub struct QueryDefinition<V> {
    key: CacheKey,
    fetcher: Fetcher<V>,
    provides: TagProvider<V>,
}

impl<V: 'static> QueryDefinition<V> {
    /// Creates a definition that provides no tags.
    pub fn new<F>(key: CacheKey, fetcher: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(fetcher),
            provides: Arc::new(|_: &V| Vec::<Tag>::new()),
        }
    }

    /// Declares the tags the fetched data provides.
    #[must_use]
    pub fn provides_tags<F>(mut self, provides: F) -> Self
    where
        F: Fn(&V) -> Vec<Tag> + Send + Sync + 'static,
    {
        self.provides = Arc::new(provides);
        self
    }

    /// The cache key this query reads and writes.
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl<V> Clone for QueryDefinition<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            provides: self.provides.clone(),
        }
    }
}

impl<V> fmt::Debug for QueryDefinition<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A client for managing query cache and invalidation.
///
/// The `QueryClient` is the central state manager for queries. It handles:
/// - Caching query results keyed by [`CacheKey`]
/// - Sharing one in-flight request between concurrent callers of the same key
/// - Mapping invalidation tags to cache keys and sweeping them
/// - Broadcasting [`CacheEvent`]s to subscribed queries
///
/// Clones share the same cache. Dropping the last clone discards all state.
///
/// # Example
///
/// ```rust
/// use postcache::http::{QueryClient, QueryConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Some(Duration::from_secs(30)), // stale_time
///     Duration::from_secs(300),      // cache_time
/// );
///
/// let client = Arc::new(QueryClient::with_config(config));
/// ```
#[derive(Clone)]
pub struct QueryClient {
    cache: Arc<DashMap<CacheKey, Box<dyn StoredEntry>>>,
    in_flight: Arc<DashMap<CacheKey, Box<dyn Any + Send + Sync>>>,
    raced: Arc<DashMap<CacheKey, RacedInvalidation>>,
    tags: Arc<TagIndex>,
    subscribers: Arc<DashMap<CacheKey, usize>>,
    events: broadcast::Sender<CacheEvent>,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            cache: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            raced: Arc::new(DashMap::new()),
            tags: Arc::new(TagIndex::default()),
            subscribers: Arc::new(DashMap::new()),
            events,
            config,
        }
    }

    /// Gets the query configuration.
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns the data for `query`, from cache when fresh, otherwise from the network.
    ///
    /// Concurrent calls for the same key share one request.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error; it is also stored in the cache entry.
    pub async fn fetch<V>(&self, query: &QueryDefinition<V>) -> Result<V, QueryError>
    where
        V: Clone + Send + Sync + 'static,
    {
        if let Some(data) = self.fresh_data::<V>(&query.key) {
            debug!(key = %query.key, "cache hit");
            return Ok(data);
        }
        self.join_or_start(query).await
    }

    fn fresh_data<V>(&self, key: &CacheKey) -> Option<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut slot = self.cache.get_mut(key)?;
        let entry = slot.as_any_mut().downcast_mut::<CacheEntry<V>>()?;
        if entry.status != QueryStatus::Success || entry.check_staleness(self.config.stale_time) {
            return None;
        }
        entry.data.clone()
    }

    fn join_or_start<V>(&self, query: &QueryDefinition<V>) -> SharedFetch<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let pending = match self.in_flight.entry(query.key.clone()) {
            Entry::Occupied(mut slot) => {
                if let Some(pending) = slot.get().downcast_ref::<SharedFetch<V>>() {
                    debug!(key = %query.key, "joining in-flight request");
                    return pending.clone();
                }
                let pending = self.start_fetch(query);
                slot.insert(Box::new(pending.clone()));
                pending
            }
            Entry::Vacant(slot) => {
                let pending = self.start_fetch(query);
                slot.insert(Box::new(pending.clone()));
                pending
            }
        };

        debug!(key = %query.key, "fetching");
        self.raced
            .insert(query.key.clone(), RacedInvalidation::default());
        self.with_entry::<V, _>(&query.key, CacheEntry::start_loading);
        pending
    }

    fn start_fetch<V>(&self, query: &QueryDefinition<V>) -> SharedFetch<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let client = self.clone();
        let key = query.key.clone();
        let fetcher = query.fetcher.clone();
        let provides = query.provides.clone();

        async move {
            let result = fetcher().await;
            let mut carried = Vec::new();
            match &result {
                Ok(data) => {
                    let provided = provides(data);
                    carried = client.tags.tags_of(&key);
                    carried.extend(provided.iter().cloned());
                    client.tags.retag(&key, provided);
                    client.with_entry::<V, _>(&key, |entry| entry.succeed(data.clone()));
                }
                Err(error) => {
                    warn!(key = %key, %error, "fetch failed");
                    client.with_entry::<V, _>(&key, |entry| entry.fail(error.clone()));
                }
            }
            client.replay_raced(&key, &carried);
            // Store first: a caller arriving now either joins this request or sees the result.
            client.in_flight.remove(&key);
            result
        }
        .boxed()
        .shared()
    }

    /// Re-marks `key` stale if one of the tags it carried, before or after
    /// the fetch, was invalidated while the request was out.
    fn replay_raced(&self, key: &CacheKey, carried: &[Tag]) {
        let Some((_, raced)) = self.raced.remove(key) else {
            return;
        };
        if !raced.tags.iter().any(|tag| carried.contains(tag)) {
            return;
        }
        if let Some(mut slot) = self.cache.get_mut(key) {
            slot.mark_stale();
        }
        debug!(key = %key, "invalidated while fetching");
        if !raced.notified {
            let _ = self.events.send(CacheEvent::Invalidated(key.clone()));
        }
    }

    /// Runs `f` on the typed entry for `key`, creating (or replacing a mistyped) entry first.
    fn with_entry<V, R>(&self, key: &CacheKey, f: impl FnOnce(&mut CacheEntry<V>) -> R) -> R
    where
        V: Send + Sync + 'static,
    {
        let mut slot = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Box::new(CacheEntry::<V>::new()) as Box<dyn StoredEntry>);
        if let Some(entry) = slot.as_any_mut().downcast_mut::<CacheEntry<V>>() {
            return f(entry);
        }
        let mut entry = CacheEntry::<V>::new();
        let out = f(&mut entry);
        let replacement: Box<dyn StoredEntry> = Box::new(entry);
        *slot = replacement;
        out
    }

    /// A copy of the cache entry for `key`, if it holds a `V`.
    pub fn entry<V>(&self, key: &CacheKey) -> Option<CacheEntry<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.cache
            .get(key)
            .and_then(|slot| slot.as_any().downcast_ref::<CacheEntry<V>>().cloned())
    }

    /// The cached data for `key`, stale or not.
    pub fn data<V>(&self, key: &CacheKey) -> Option<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.cache.get(key).and_then(|slot| {
            slot.as_any()
                .downcast_ref::<CacheEntry<V>>()
                .and_then(|entry| entry.data.clone())
        })
    }

    /// The lifecycle status of `key`; `Idle` when nothing was ever requested.
    pub fn status(&self, key: &CacheKey) -> QueryStatus {
        self.cache
            .get(key)
            .map_or(QueryStatus::Idle, |slot| slot.status())
    }

    /// The error stored by the last failed fetch of `key`.
    pub fn error(&self, key: &CacheKey) -> Option<QueryError> {
        self.cache.get(key).and_then(|slot| slot.error())
    }

    /// Returns `true` if `key` is cached and marked stale.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.cache.get(key).is_some_and(|slot| slot.is_stale())
    }

    /// Tags currently provided by `key`.
    pub fn tags_of(&self, key: &CacheKey) -> Vec<Tag> {
        self.tags.tags_of(key)
    }

    /// Changes cached data in place and notifies subscribers.
    ///
    /// `recipe` returns `None` when it changed nothing; subscribers are then
    /// not notified. Returns `None` without calling `recipe` when `key` holds
    /// no `V` data.
    pub fn update_data<V, R>(
        &self,
        key: &CacheKey,
        recipe: impl FnOnce(&mut V) -> Option<R>,
    ) -> Option<R>
    where
        V: Send + Sync + 'static,
    {
        let out = {
            let mut slot = self.cache.get_mut(key)?;
            let entry = slot.as_any_mut().downcast_mut::<CacheEntry<V>>()?;
            recipe(entry.data.as_mut()?)?
        };
        let _ = self.events.send(CacheEvent::Updated(key.clone()));
        Some(out)
    }

    /// Marks every entry providing one of `tags` as stale and notifies subscribers.
    ///
    /// Subscribed queries refetch right away; the rest refetch on next access.
    /// Returns the affected keys.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<CacheKey> {
        let keys = self.tags.keys_for(tags);
        // Requests already out may answer with pre-invalidation data
        for mut pending in self.raced.iter_mut() {
            let notified = keys.contains(pending.key());
            pending.tags.extend_from_slice(tags);
            pending.notified |= notified;
        }
        for key in &keys {
            if let Some(mut slot) = self.cache.get_mut(key) {
                slot.mark_stale();
            }
            // No receivers is fine: nobody is subscribed.
            let _ = self.events.send(CacheEvent::Invalidated(key.clone()));
        }
        debug!(?tags, invalidated = keys.len(), "invalidated tags");
        keys
    }

    /// Invalidates `tags`, returning a `Command` that performs the invalidation as a side effect.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// fn update(&mut self, msg: Message) -> Command<Message> {
    ///     match msg {
    ///         Message::PostSaved(post) => {
    ///             self.query_client.invalidate(vec![Tag::id(TagKind::Post, post.id)])
    ///         }
    ///     }
    /// }
    /// ```
    pub fn invalidate<Msg>(&self, tags: Vec<Tag>) -> Command<Msg>
    where
        Msg: Send + 'static,
    {
        let client = self.clone();
        Command::effect(async move {
            client.invalidate_tags(&tags);
        })
    }

    /// Subscribes to cache notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Number of live query subscriptions for `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.subscribers.get(key).map_or(0, |count| *count)
    }

    pub(crate) fn register_subscriber(&self, key: &CacheKey) -> SubscriberGuard {
        *self.subscribers.entry(key.clone()).or_insert(0) += 1;
        SubscriberGuard {
            subscribers: self.subscribers.clone(),
            key: key.clone(),
        }
    }

    /// Drops entries nobody subscribes to that are older than `cache_time`.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let cache_time = self.config.cache_time;
        let expired: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|slot| slot.should_gc(cache_time))
            .map(|slot| slot.key().clone())
            .filter(|key| self.subscriber_count(key) == 0)
            .collect();

        for key in &expired {
            self.cache.remove(key);
            self.tags.unlink(key);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "collected unused cache entries");
        }
        expired.len()
    }

    /// Discards every cached entry, pending request and tag association.
    pub fn reset(&self) {
        self.cache.clear();
        self.in_flight.clear();
        self.raced.clear();
        self.tags.clear();
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.cache.len())
            .field("in_flight", &self.in_flight.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tags invalidated while a key's request was in flight.
#[derive(Debug, Default)]
struct RacedInvalidation {
    tags: Vec<Tag>,
    /// An `Invalidated` event for the key was already broadcast.
    notified: bool,
}

/// Keeps a key counted as subscribed until dropped.
pub(crate) struct SubscriberGuard {
    subscribers: Arc<DashMap<CacheKey, usize>>,
    key: CacheKey,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.subscribers.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.subscribers.remove_if(&self.key, |_, count| *count == 0);
    }
}

/// A query subscription that monitors and fetches data with caching.
///
/// `Query` is a subscription that automatically manages data fetching and caching.
/// When subscribed:
///
/// 1. If cached data exists, it's immediately emitted as `Success`
/// 2. If data is missing or stale, a fetch is triggered (`Loading` is emitted first when nothing is cached)
/// 3. When invalidated, the query automatically refetches
/// 4. When the cached data is patched, the patched data is emitted
///
/// # Example
///
/// ```rust,ignore
/// use postcache::subscription::Subscription;
/// use postcache::http::{Query, QueryClient};
/// use std::sync::Arc;
///
/// let client = Arc::new(QueryClient::new());
///
/// let query = Subscription::new(Query::new(posts_definition, client.clone()))
///     .map(Message::PostsQuery);
/// ```
pub struct Query<V> {
    definition: QueryDefinition<V>,
    client: Arc<QueryClient>,
}

impl<V> Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new query from a definition and the client that caches it.
    pub const fn new(definition: QueryDefinition<V>, client: Arc<QueryClient>) -> Self {
        Self { definition, client }
    }
}

impl<V> SubscriptionSource for Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = QueryResult<V>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let query = self.definition.clone();
        let client = self.client.clone();
        // Listen before the first emission so an invalidation during the initial fetch is not lost.
        let cursor = Cursor {
            phase: Phase::Initial,
            rx: client.subscribe_events(),
            _guard: client.register_subscriber(&query.key),
        };

        stream::unfold(cursor, move |cursor| {
            let query = query.clone();
            let client = client.clone();
            async move { step(&client, &query, cursor).await }
        })
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        SubscriptionId::of::<Self>(hasher.finish())
    }
}

impl<V> Hash for Query<V> {
    fn hash<H>(&self, hasher: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.definition.key.hash(hasher);
    }
}

/// Internal state machine for the Query subscription.
enum Phase {
    Initial,
    Fetching,
    Watching,
}

struct Cursor {
    phase: Phase,
    rx: broadcast::Receiver<CacheEvent>,
    _guard: SubscriberGuard,
}

impl Cursor {
    fn then(self, phase: Phase) -> Self {
        Self { phase, ..self }
    }
}

async fn step<V>(
    client: &QueryClient,
    query: &QueryDefinition<V>,
    mut cursor: Cursor,
) -> Option<(QueryResult<V>, Cursor)>
where
    V: Clone + Send + Sync + 'static,
{
    match cursor.phase {
        Phase::Initial => {
            let cached = client
                .entry::<V>(&query.key)
                .and_then(|mut entry| {
                    let is_stale = entry.check_staleness(client.config().stale_time);
                    entry.data.map(|data| (data, is_stale))
                });

            let (state, next) = match cached {
                // Stale data: emit it, then refetch
                Some((data, true)) => (QueryState::Success { data, is_stale: true }, Phase::Fetching),
                // Fresh data: emit it, then wait for invalidation
                Some((data, false)) => (QueryState::Success { data, is_stale: false }, Phase::Watching),
                // No cache: emit Loading, then fetch
                None => (QueryState::Loading, Phase::Fetching),
            };
            Some((QueryResult { state }, cursor.then(next)))
        }

        Phase::Fetching => {
            let result = QueryResult::from(client.fetch(query).await);
            Some((result, cursor.then(Phase::Watching)))
        }

        Phase::Watching => loop {
            match cursor.rx.recv().await {
                Ok(CacheEvent::Invalidated(key)) if key == query.key => {
                    let result = QueryResult {
                        state: QueryState::Loading,
                    };
                    return Some((result, cursor.then(Phase::Fetching)));
                }
                Ok(CacheEvent::Updated(key)) if key == query.key => {
                    if let Some(entry) = client.entry::<V>(&key)
                        && let Some(data) = entry.data
                    {
                        let result = QueryResult {
                            state: QueryState::Success {
                                data,
                                is_stale: entry.is_stale,
                            },
                        };
                        return Some((result, cursor.then(Phase::Watching)));
                    }
                }
                Ok(_) => {
                    // Different key, keep waiting
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Our invalidation may have been dropped; a fetch is a cache hit if it wasn't.
                    warn!(key = %query.key, skipped, "query subscription lagged");
                    let result = QueryResult {
                        state: QueryState::Loading,
                    };
                    return Some((result, cursor.then(Phase::Fetching)));
                }
                Err(RecvError::Closed) => return None,
            }
        },
    }
}
