//! The request capability consumed by the scheduler.
//!
//! The registry never talks to the network itself. Every tick goes through a
//! [`RequestExecutor`], which receives an immutable [`RequestDescriptor`] and a
//! cancellation token and returns a parsed JSON payload or a
//! [`RequestFailure`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// HTTP method for a polling request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to request on every tick.
///
/// Replaced wholesale by reconfiguration, never mutated while a request is in
/// flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDescriptor {
    /// Target endpoint.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body. Ignored for `GET`.
    pub body: Option<String>,
}

impl RequestDescriptor {
    /// A `GET` request to `url` with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The body to send, if any. `GET` requests never carry one.
    pub fn effective_body(&self) -> Option<&str> {
        match self.method {
            HttpMethod::Get => None,
            _ => self.body.as_deref(),
        }
    }
}

/// Why a single request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestFailure {
    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {reason}")]
    Status {
        /// Numeric status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// The response body was not a usable payload.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request deadline expired.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The request was aborted through its cancellation token.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestFailure {
    /// Returns `true` for failures caused by the transport rather than the
    /// server's answer (network errors, deadline expiry, aborts).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Cancelled)
    }
}

/// Issues a request and parses the response.
///
/// Implementations should stop work promptly once `cancel` fires; the
/// registry also drops the returned future when it cancels, so honouring the
/// token is only needed for work spawned outside the future.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, RequestFailure>;
}
