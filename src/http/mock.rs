//! In-memory backend for tests and demos.
//!
//! [`MockBackend`] implements [`Transport`] by serving a json-server style
//! `/posts` collection from memory, so the cache can be exercised end to end
//! without a network.
//!
//! # Basic Usage
//!
//! ```
//! use postcache::http::mock::MockBackend;
//! use postcache::http::transport::Method;
//! use postcache::http::QueryError;
//! use serde_json::json;
//!
//! let backend = MockBackend::with_posts(vec![
//!     json!({"id": 1, "userId": 1, "title": "hello", "body": "world"}),
//! ]);
//!
//! // Make the next PATCH fail, e.g. to exercise a rollback
//! backend.fail_next(Method::Patch, QueryError::NetworkError("offline".to_string()));
//! assert_eq!(backend.posts().len(), 1);
//! ```
//!
//! Clones share the same state, so a test can keep one handle for inspection
//! while the cache owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use super::query::QueryError;
use super::transport::{ApiRequest, Method, Transport};

const COLLECTION: &str = "/posts";

#[derive(Debug, Default)]
struct State {
    posts: Vec<Value>,
    requests: Vec<ApiRequest>,
    failures: HashMap<Method, VecDeque<QueryError>>,
    latency: Option<Duration>,
}

/// A json-server imitation holding a `/posts` collection.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend serving the given records, in order.
    #[must_use]
    pub fn with_posts(posts: Vec<Value>) -> Self {
        let backend = Self::new();
        backend.state.lock().posts = posts;
        backend
    }

    /// Delays every response by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    /// Makes the next request using `method` fail with `error` instead of being served.
    pub fn fail_next(&self, method: Method, error: QueryError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests received with `method`.
    #[must_use]
    pub fn request_count(&self, method: Method) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// The records currently stored.
    #[must_use]
    pub fn posts(&self) -> Vec<Value> {
        self.state.lock().posts.clone()
    }

    fn handle(&self, request: &ApiRequest) -> Result<Value, QueryError> {
        let mut state = self.state.lock();
        if let Some(error) = state
            .failures
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let not_found = || QueryError::NotFound(request.path.clone());
        let id = match request.path.strip_prefix(COLLECTION) {
            Some("") => None,
            Some(rest) => Some(rest.strip_prefix('/').ok_or_else(not_found)?),
            None => return Err(not_found()),
        };

        match (request.method, id) {
            (Method::Get, None) => {
                let matches = |post: &&Value| {
                    request
                        .query
                        .iter()
                        .all(|(field, wanted)| post.get(field).is_some_and(|v| render(v) == *wanted))
                };
                Ok(Value::Array(
                    state.posts.iter().filter(matches).cloned().collect(),
                ))
            }
            (Method::Get, Some(id)) => state
                .posts
                .iter()
                .find(|post| has_id(post, id))
                .cloned()
                .ok_or_else(not_found),
            (Method::Post, None) => {
                let mut record = body_object(request)?;
                if !record.contains_key("id") {
                    record.insert("id".to_string(), json!(next_id(&state.posts)));
                }
                let record = Value::Object(record);
                state.posts.push(record.clone());
                Ok(record)
            }
            (Method::Put, Some(id)) => {
                let mut record = body_object(request)?;
                let slot = state
                    .posts
                    .iter_mut()
                    .find(|post| has_id(post, id))
                    .ok_or_else(not_found)?;
                if let Some(existing) = slot.get("id") {
                    record.insert("id".to_string(), existing.clone());
                }
                *slot = Value::Object(record);
                Ok(slot.clone())
            }
            (Method::Patch, Some(id)) => {
                let changes = body_object(request)?;
                let slot = state
                    .posts
                    .iter_mut()
                    .find(|post| has_id(post, id))
                    .ok_or_else(not_found)?;
                if let Value::Object(fields) = slot {
                    for (name, value) in changes {
                        if name != "id" {
                            fields.insert(name, value);
                        }
                    }
                }
                Ok(slot.clone())
            }
            (Method::Delete, Some(id)) => {
                let position = state
                    .posts
                    .iter()
                    .position(|post| has_id(post, id))
                    .ok_or_else(not_found)?;
                state.posts.remove(position);
                Ok(json!({}))
            }
            _ => Err(QueryError::FetchError(format!("{request}: 405 Method Not Allowed"))),
        }
    }
}

impl Transport for MockBackend {
    fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<Value, QueryError>> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.latency
        };
        let backend = self.clone();

        async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            backend.handle(&request)
        }
        .boxed()
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn has_id(post: &Value, id: &str) -> bool {
    post.get("id").is_some_and(|v| render(v) == id)
}

fn next_id(posts: &[Value]) -> u64 {
    posts
        .iter()
        .filter_map(|post| post.get("id").and_then(Value::as_u64))
        .max()
        .map_or(1, |max| max + 1)
}

fn body_object(request: &ApiRequest) -> Result<Map<String, Value>, QueryError> {
    match &request.body {
        Some(Value::Object(fields)) => Ok(fields.clone()),
        _ => Err(QueryError::FetchError(format!(
            "{request}: 400 Bad Request (expected a JSON object body)"
        ))),
    }
}
