//! The HTTP seam: a request description, the [`Transport`] trait and a
//! `reqwest` implementation.

use std::fmt;

use futures::future::BoxFuture;
use serde_json::Value;

use super::query::QueryError;

#[cfg(feature = "http-client")]
pub use self::reqwest_transport::HttpTransport;

/// The HTTP verbs the cache issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// One request against the backend, relative to its base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (name, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// Sends [`ApiRequest`]s and yields the decoded JSON response body.
///
/// An empty response body is returned as [`Value::Null`].
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<Value, QueryError>>;
}

#[cfg(feature = "http-client")]
mod reqwest_transport {
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use reqwest::StatusCode;
    use serde_json::Value;
    use tracing::debug;

    use super::{ApiRequest, Method, Transport};
    use crate::http::config::ApiConfig;
    use crate::http::query::QueryError;

    /// [`Transport`] over a real HTTP connection.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        config: ApiConfig,
    }

    impl HttpTransport {
        /// # Errors
        ///
        /// Returns [`QueryError::NetworkError`] if the HTTP client cannot be built.
        pub fn new(config: ApiConfig) -> Result<Self, QueryError> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| QueryError::NetworkError(e.to_string()))?;
            Ok(Self { client, config })
        }
    }

    impl Transport for HttpTransport {
        fn send(&self, request: ApiRequest) -> BoxFuture<'static, Result<Value, QueryError>> {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self
                .client
                .request(method, self.config.endpoint(&request.path))
                .query(&request.query);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            async move {
                debug!(%request, "sending request");
                let response = builder
                    .send()
                    .await
                    .map_err(|e| QueryError::NetworkError(e.to_string()))?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(QueryError::NotFound(request.path));
                }
                if !status.is_success() {
                    return Err(QueryError::FetchError(format!("{request}: {status}")));
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| QueryError::NetworkError(e.to_string()))?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_str(&text).map_err(|e| QueryError::DecodeError(e.to_string()))
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_display() {
        let request = ApiRequest::get("/posts").query("userId", 3).query("_sort", "date");
        assert_eq!(request.to_string(), "GET /posts?userId=3&_sort=date");
    }

    #[test]
    fn test_request_json_body() {
        let request = ApiRequest::new(Method::Patch, "/posts/1").json(json!({"reactions": {}}));
        assert_eq!(request.method, Method::Patch);
        assert_eq!(request.body, Some(json!({"reactions": {}})));
    }

    #[cfg(feature = "http-client")]
    #[tokio::test]
    async fn test_http_transport_reports_network_error() {
        use crate::http::config::ApiConfig;

        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let config = ApiConfig::new("http://127.0.0.1:9")
            .expect("valid url")
            .with_timeout(std::time::Duration::from_millis(500));
        let transport = HttpTransport::new(config).expect("client builds");

        let result = transport.send(ApiRequest::get("/posts")).await;
        assert!(matches!(result, Err(QueryError::NetworkError(_))));
    }
}
