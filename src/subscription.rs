//! Long-lived event sources and the manager that runs them.
//!
//! A [`Subscription`] wraps anything implementing [`SubscriptionSource`]: a
//! recipe for a stream of values plus a stable [`SubscriptionId`]. The
//! [`SubscriptionManager`] diffs the set of wanted subscriptions against the
//! running ones, starting new streams and cancelling those no longer listed.
//!
//! Query results are delivered this way: a [`Query`](crate::http::Query) is a
//! subscription source, and a query counts as *subscribed* (and therefore
//! refetches immediately on invalidation) for as long as its stream is alive.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identity of a subscription: the source type plus a hash of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Creates an id for source type `T` with the given parameter hash.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }
}

/// A source of values that can be turned into a stream.
pub trait SubscriptionSource: Send + Sync + 'static {
    /// The type of value emitted.
    type Output;

    /// Creates a fresh stream of values.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    /// Stable identity; two sources with the same id are considered the same subscription.
    fn id(&self) -> SubscriptionId;
}

/// A type-erased, mappable subscription producing `Msg`.
pub struct Subscription<Msg> {
    pub(crate) id: SubscriptionId,
    pub(crate) spawn: Arc<dyn Fn() -> BoxStream<'static, Msg> + Send + Sync>,
}

impl<Msg: Send + 'static> Subscription<Msg> {
    /// Wraps a subscription source.
    pub fn new<S>(source: S) -> Self
    where
        S: SubscriptionSource<Output = Msg>,
    {
        let id = source.id();
        Self {
            id,
            spawn: Arc::new(move || source.stream()),
        }
    }

    /// Transforms every emitted value.
    #[must_use]
    pub fn map<F, B>(self, f: F) -> Subscription<B>
    where
        F: Fn(Msg) -> B + Send + Sync + Clone + 'static,
        B: Send + 'static,
    {
        let spawn = self.spawn;
        Subscription {
            id: self.id,
            spawn: Arc::new(move || spawn().map(f.clone()).boxed()),
        }
    }

    /// The subscription's identity.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Starts a new stream for this subscription.
    #[must_use]
    pub fn stream(&self) -> BoxStream<'static, Msg> {
        (self.spawn)()
    }
}

/// Handle for a running subscription task
pub struct Handle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Cancel the subscription and wait for task completion
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Runs subscriptions on the tokio runtime and forwards their values into a channel.
pub struct SubscriptionManager<Msg> {
    tx: mpsc::UnboundedSender<Msg>,
    running: HashMap<SubscriptionId, Handle>,
}

impl<Msg: Send + 'static> SubscriptionManager<Msg> {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self {
            tx,
            running: HashMap::new(),
        }
    }

    /// Makes the running set match `subscriptions`.
    ///
    /// Subscriptions already running keep their stream; new ones are started and
    /// missing ones are cancelled (without waiting for their tasks).
    pub fn update(&mut self, subscriptions: impl IntoIterator<Item = Subscription<Msg>>) {
        let mut wanted = HashMap::new();
        for sub in subscriptions {
            wanted.insert(sub.id, sub);
        }

        self.running.retain(|id, handle| {
            let keep = wanted.contains_key(id);
            if !keep {
                handle.token.cancel();
            }
            keep
        });

        for (id, sub) in wanted {
            if self.running.contains_key(&id) {
                continue;
            }
            debug!(?id, "starting subscription");
            let handle = self.spawn(&sub);
            self.running.insert(id, handle);
        }
    }

    fn spawn(&self, sub: &Subscription<Msg>) -> Handle {
        let token = CancellationToken::new();
        let child = token.clone();
        let tx = self.tx.clone();
        let mut stream = sub.stream();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    next = stream.next() => match next {
                        Some(msg) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Handle::new(token, join)
    }

    /// Number of running subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.running.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Cancels every subscription and waits for their tasks to finish.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::hash::{DefaultHasher, Hash, Hasher};
    use std::time::Duration;

    #[derive(Clone)]
    struct Counter {
        upto: u32,
    }

    impl SubscriptionSource for Counter {
        type Output = u32;

        fn stream(&self) -> BoxStream<'static, u32> {
            stream::iter(1..=self.upto).boxed()
        }

        fn id(&self) -> SubscriptionId {
            let mut hasher = DefaultHasher::new();
            self.upto.hash(&mut hasher);
            SubscriptionId::of::<Self>(hasher.finish())
        }
    }

    struct Forever;

    impl SubscriptionSource for Forever {
        type Output = ();

        fn stream(&self) -> BoxStream<'static, ()> {
            stream::pending().boxed()
        }

        fn id(&self) -> SubscriptionId {
            SubscriptionId::of::<Self>(0)
        }
    }

    #[test]
    fn test_id_depends_on_type_and_hash() {
        assert_eq!(Counter { upto: 1 }.id(), Counter { upto: 1 }.id());
        assert_ne!(Counter { upto: 1 }.id(), Counter { upto: 2 }.id());
        assert_ne!(SubscriptionId::of::<Counter>(0), Forever.id());
    }

    #[tokio::test]
    async fn test_map_transforms_values() {
        let sub = Subscription::new(Counter { upto: 3 }).map(|n| n * 10);
        let values: Vec<_> = sub.stream().collect().await;
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_manager_forwards_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = SubscriptionManager::new(tx);
        manager.update(vec![Subscription::new(Counter { upto: 2 })]);

        let first = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert_eq!(first.expect("should receive within timeout"), Some(1));
        let second = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert_eq!(second.expect("should receive within timeout"), Some(2));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manager_diffs_running_set() {
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let mut manager = SubscriptionManager::new(tx);

        manager.update(vec![Subscription::new(Forever)]);
        assert_eq!(manager.len(), 1);

        // Same id again: nothing restarts
        manager.update(vec![Subscription::new(Forever)]);
        assert_eq!(manager.len(), 1);

        manager.update(Vec::new());
        assert!(manager.is_empty());
    }
}
