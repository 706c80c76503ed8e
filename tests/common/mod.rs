//! Shared fixtures for registry integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use serde_json::Value;
use smart_poll::{
    EnvironmentController, PollCallbacks, PollHandler, PollRegistry, RequestDescriptor,
    RequestExecutor, RequestFailure,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Value),
    Fail(RequestFailure),
    /// Reply after a delay.
    Slow(Duration, Value),
    /// Never answer.
    Hang,
}

/// In-memory executor replaying a script, then repeating a fallback step.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with `payload`.
    pub fn always(payload: Value) -> Arc<Self> {
        Self::new(Vec::new(), Step::Reply(payload))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &RequestDescriptor,
        _cancel: CancellationToken,
    ) -> Result<Value, RequestFailure> {
        self.calls.lock().unwrap().push(request.url.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(payload) => Ok(payload),
            Step::Fail(failure) => Err(failure),
            Step::Slow(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Handler recording every callback.
#[derive(Default)]
pub struct Recorder {
    pub payloads: Mutex<Vec<Value>>,
    pub errors: Mutex<Vec<RequestFailure>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<RequestFailure> {
        self.errors.lock().unwrap().clone()
    }
}

impl PollHandler for Recorder {
    fn on_success(&self, payload: &Value) {
        self.payloads.lock().unwrap().push(payload.clone());
    }

    fn on_error(&self, failure: &RequestFailure) {
        self.errors.lock().unwrap().push(failure.clone());
    }
}

/// A registry over `executor` with the given initial environment.
pub fn registry(
    executor: Arc<ScriptedExecutor>,
    online: bool,
    visible: bool,
) -> (PollRegistry, EnvironmentController) {
    let (env, signals) = EnvironmentController::new(online, visible);
    (PollRegistry::new(executor, signals), env)
}

pub fn noop_handler() -> Arc<dyn PollHandler> {
    PollCallbacks::new().into_handler()
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
