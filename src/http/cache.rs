use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use super::query::QueryError;

/// Identifies a cached query result: the endpoint name plus its serialized argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub endpoint: &'static str,
    pub arg: String,
}

impl CacheKey {
    /// Builds a key from an endpoint name and any serializable argument.
    ///
    /// The argument is rendered as JSON, so `()` becomes `null` and `3` becomes `3`.
    /// An argument JSON cannot represent gets a key of its own that matches no
    /// other key; use [`CacheKey::try_new`] to reject it instead.
    pub fn new<A: Serialize + ?Sized>(endpoint: &'static str, arg: &A) -> Self {
        Self::try_new(endpoint, arg).unwrap_or_else(|error| {
            static UNSERIALIZABLE: AtomicU64 = AtomicU64::new(0);
            let n = UNSERIALIZABLE.fetch_add(1, Ordering::Relaxed);
            warn!(endpoint, %error, "argument is not serializable, caching under a private key");
            Self {
                endpoint,
                arg: format!("#unserializable-{n}"),
            }
        })
    }

    /// Builds a key, failing when the argument cannot be rendered as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] for arguments such as maps with non-string keys.
    pub fn try_new<A: Serialize + ?Sized>(endpoint: &'static str, arg: &A) -> Result<Self, QueryError> {
        let arg = serde_json::to_string(arg).map_err(|e| QueryError::InvalidInput(e.to_string()))?;
        Ok(Self { endpoint, arg })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.arg)
    }
}

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// A cached entry with timestamp and staleness information.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: Option<T>,
    pub status: QueryStatus,
    pub error: Option<QueryError>,
    pub timestamp: Instant,
    pub is_stale: bool,
}

impl<T> CacheEntry<T> {
    /// Creates an idle entry holding no data.
    pub fn new() -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            timestamp: Instant::now(),
            is_stale: false,
        }
    }

    /// Creates a successful entry with the given data.
    pub fn with_data(data: T) -> Self {
        Self {
            data: Some(data),
            status: QueryStatus::Success,
            error: None,
            timestamp: Instant::now(),
            is_stale: false,
        }
    }

    /// Checks if this entry is stale, either explicitly or because it outlived `stale_time`.
    pub fn check_staleness(&mut self, stale_time: Option<Duration>) -> bool {
        if stale_time.is_some_and(|limit| self.timestamp.elapsed() > limit) {
            self.is_stale = true;
        }
        self.is_stale
    }

    /// Moves to `Loading`, keeping whatever data is already there.
    pub const fn start_loading(&mut self) {
        self.status = QueryStatus::Loading;
    }

    /// Stores fresh data, resetting timestamp, error and staleness.
    pub fn succeed(&mut self, data: T) {
        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.error = None;
        self.timestamp = Instant::now();
        self.is_stale = false;
    }

    /// Records a failed fetch. Previous data is kept but marked stale.
    pub fn fail(&mut self, error: QueryError) {
        self.status = QueryStatus::Error;
        self.error = Some(error);
        self.timestamp = Instant::now();
        self.is_stale = true;
    }
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`CacheEntry`], so the client can sweep entries
/// without knowing what each query stores.
pub(crate) trait StoredEntry: Send + Sync {
    fn mark_stale(&mut self);
    fn is_stale(&self) -> bool;
    fn status(&self) -> QueryStatus;
    fn error(&self) -> Option<QueryError>;
    fn should_gc(&self, cache_time: Duration) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> StoredEntry for CacheEntry<T> {
    fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    fn is_stale(&self) -> bool {
        self.is_stale
    }

    fn status(&self) -> QueryStatus {
        self.status
    }

    fn error(&self) -> Option<QueryError> {
        self.error.clone()
    }

    fn should_gc(&self, cache_time: Duration) -> bool {
        self.status != QueryStatus::Loading && self.timestamp.elapsed() > cache_time
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_new_entry() {
        let entry = CacheEntry::<i32>::new();
        assert!(entry.data.is_none());
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(!entry.is_stale);
    }

    #[test]
    fn test_check_staleness_without_limit() {
        let mut entry = CacheEntry::with_data(42);
        sleep(Duration::from_millis(5));
        assert!(!entry.check_staleness(None));
    }

    #[test]
    fn test_check_staleness_stale() {
        let mut entry = CacheEntry::with_data(42);
        sleep(Duration::from_millis(10));
        let is_stale = entry.check_staleness(Some(Duration::from_millis(5)));
        assert!(is_stale);
        assert!(entry.is_stale);
    }

    #[test]
    fn test_mark_stale_then_succeed() {
        let mut entry = CacheEntry::with_data(42);
        entry.mark_stale();
        assert!(entry.is_stale);

        entry.start_loading();
        assert_eq!(entry.status, QueryStatus::Loading);
        assert_eq!(entry.data, Some(42));

        entry.succeed(100);
        assert_eq!(entry.data, Some(100));
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(!entry.is_stale);
    }

    #[test]
    fn test_fail_keeps_data() {
        let mut entry = CacheEntry::with_data(1);
        entry.fail(QueryError::NetworkError("down".to_string()));
        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.data, Some(1));
        assert!(entry.is_stale);
        assert!(StoredEntry::error(&entry).is_some());
    }

    #[test]
    fn test_loading_entry_is_never_collected() {
        let mut entry = CacheEntry::<i32>::new();
        entry.start_loading();
        sleep(Duration::from_millis(2));
        assert!(!entry.should_gc(Duration::from_millis(1)));
    }

    #[test]
    fn test_unserializable_arguments_never_share_a_key() {
        use std::collections::BTreeMap;

        let first = BTreeMap::from([((1, 2), "a")]);
        let second = BTreeMap::from([((3, 4), "b")]);
        assert!(matches!(
            CacheKey::try_new("pairs", &first),
            Err(QueryError::InvalidInput(_))
        ));

        let a = CacheKey::new("pairs", &first);
        let b = CacheKey::new("pairs", &second);
        assert_ne!(a, b);
        assert_ne!(a, CacheKey::new("pairs", &first));
    }

    #[test]
    fn test_cache_key_serializes_argument() {
        assert_eq!(CacheKey::new("getPosts", &()).to_string(), "getPosts(null)");
        assert_eq!(
            CacheKey::new("getPostsByUserId", &3).to_string(),
            "getPostsByUserId(3)"
        );
    }
}
