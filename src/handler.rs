//! Per-task callbacks.
//!
//! The registry calls a task's [`PollHandler`] synchronously after every
//! completed request, never while holding its internal lock, so handlers may
//! call back into the registry (for example `reset_interval` or `poll_now`).
//!
//! A task whose handler leaves `on_error` at its default loses failure
//! notifications silently. Polling never surfaces errors any other way.

use crate::request::RequestFailure;
use serde_json::Value;
use std::sync::Arc;

/// Callbacks invoked by the registry for one task.
pub trait PollHandler: Send + Sync {
    /// Called with the raw payload of every successful response, significant
    /// or not.
    fn on_success(&self, payload: &Value) {
        let _ = payload;
    }

    /// Called once per error streak when retries are exhausted.
    fn on_error(&self, failure: &RequestFailure) {
        let _ = failure;
    }

    /// Decide whether a payload carries new data.
    ///
    /// `None` defers to the task's significance schema, or the default
    /// heuristic when the task declares none.
    fn is_significant(&self, payload: &Value) -> Option<bool> {
        let _ = payload;
        None
    }
}

type SuccessFn = dyn Fn(&Value) + Send + Sync;
type ErrorFn = dyn Fn(&RequestFailure) + Send + Sync;
type PredicateFn = dyn Fn(&Value) -> bool + Send + Sync;

/// Closure-backed [`PollHandler`].
///
/// ```rust,ignore
/// let handler = PollCallbacks::new()
///     .on_success(|data| tracing::info!(%data, "new messages"))
///     .on_error(|e| tracing::warn!(error = %e, "chat polling failed"))
///     .significant_when(|data| data["messages"].as_array().is_some_and(|m| !m.is_empty()));
/// ```
#[derive(Clone, Default)]
pub struct PollCallbacks {
    success: Option<Arc<SuccessFn>>,
    error: Option<Arc<ErrorFn>>,
    predicate: Option<Arc<PredicateFn>>,
}

impl PollCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RequestFailure) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn significant_when(mut self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(f));
        self
    }

    pub fn into_handler(self) -> Arc<dyn PollHandler> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for PollCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCallbacks")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl PollHandler for PollCallbacks {
    fn on_success(&self, payload: &Value) {
        if let Some(f) = &self.success {
            f(payload);
        }
    }

    fn on_error(&self, failure: &RequestFailure) {
        if let Some(f) = &self.error {
            f(failure);
        }
    }

    fn is_significant(&self, payload: &Value) -> Option<bool> {
        self.predicate.as_ref().map(|f| f(payload))
    }
}
