//! reqwest-backed [`RequestExecutor`].
//!
//! Every request carries `X-Requested-With: XMLHttpRequest` unless the task
//! sets that header itself, so servers that branch on AJAX requests answer
//! with JSON. Bodies are only sent for non-`GET` methods.

use crate::error::PollError;
use crate::request::{HttpMethod, RequestDescriptor, RequestExecutor, RequestFailure};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const REQUESTED_WITH: &str = "X-Requested-With";
const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";
const USER_AGENT: &str = concat!("smart-poll/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Build the shared [`reqwest::Client`].
///
/// Only a connect timeout is set on the client. Each task's overall deadline
/// is enforced by the registry.
///
/// # Errors
///
/// Returns [`PollError::Http`] if the client cannot be constructed.
pub fn build_client() -> Result<reqwest::Client, PollError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| PollError::Http(format!("failed to build HTTP client: {e}")))
}

/// Executes poll requests over HTTP and parses JSON responses.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Create an executor with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Http`] if the client cannot be constructed.
    pub fn new() -> Result<Self, PollError> {
        Ok(Self::with_client(build_client()?))
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(&self, request: &RequestDescriptor) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        let overridden = request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(REQUESTED_WITH));
        if !overridden {
            builder = builder.header(REQUESTED_WITH, REQUESTED_WITH_VALUE);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.effective_body() {
            builder = builder.body(body.to_owned());
        }
        builder
    }

    async fn send(&self, request: &RequestDescriptor) -> Result<serde_json::Value, RequestFailure> {
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            });
        }

        let bytes = response.bytes().await.map_err(transport_failure)?;
        serde_json::from_slice(&bytes).map_err(|e| RequestFailure::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, RequestFailure> {
        debug!(url = %request.url, method = %request.method, "sending poll request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestFailure::Cancelled),
            result = self.send(request) => result,
        }
    }
}

fn transport_failure(err: reqwest::Error) -> RequestFailure {
    if err.is_timeout() {
        // Only the connect timeout lives on the client.
        RequestFailure::Timeout(CONNECT_TIMEOUT_MS)
    } else if err.is_decode() {
        RequestFailure::Malformed(err.to_string())
    } else {
        RequestFailure::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn client_builds() {
        assert!(HttpExecutor::new().is_ok());
    }

    #[test]
    fn get_request_has_marker_header_and_no_body() {
        let executor = HttpExecutor::new().unwrap();
        let descriptor = RequestDescriptor::get("http://localhost/poll").with_body("ignored");
        let request = executor.build_request(&descriptor).build().unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(
            request.headers().get(REQUESTED_WITH).unwrap(),
            REQUESTED_WITH_VALUE
        );
        assert!(request.body().is_none());
    }

    #[test]
    fn post_request_carries_body() {
        let executor = HttpExecutor::new().unwrap();
        let descriptor = RequestDescriptor::get("http://localhost/poll")
            .with_method(HttpMethod::Post)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"since":1}"#);
        let request = executor.build_request(&descriptor).build().unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"since":1}"#);
    }

    #[test]
    fn task_header_overrides_marker() {
        let executor = HttpExecutor::new().unwrap();
        let descriptor =
            RequestDescriptor::get("http://localhost/poll").with_header("x-requested-with", "Fetch");
        let request = executor.build_request(&descriptor).build().unwrap();
        let values: Vec<_> = request.headers().get_all(REQUESTED_WITH).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Fetch");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let executor = HttpExecutor::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor
            .execute(&RequestDescriptor::get("http://192.0.2.1/poll"), cancel)
            .await;
        assert_eq!(result, Err(RequestFailure::Cancelled));
    }
}
