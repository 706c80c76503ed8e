//! Per-task adaptive state.
//!
//! A [`PollTask`] is owned by the registry and only mutated under the
//! registry lock. The counter transitions live here so they can be tested
//! without a runtime; timers and requests are driven by the runner.

use crate::config::PollConfig;
use crate::environment::EnvironmentState;
use crate::handler::PollHandler;
use crate::interval::{IntervalInputs, calculate_interval, retry_delay, should_pause};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A pending one-shot timer. `seq` identifies it so a timer that fires after
/// being replaced can recognise itself as stale.
#[derive(Debug)]
pub(crate) struct ScheduledTimer {
    pub seq: u64,
    pub handle: AbortHandle,
}

/// The request currently outstanding for a task.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub attempt: u64,
    pub cancel: CancellationToken,
}

/// What to do after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    /// Retry after the given delay, outside the tick schedule.
    Retry(Duration),
    /// Retries exhausted: tell the handler.
    Report,
    /// Retries exhausted and already reported for this streak.
    Absorb,
}

pub(crate) struct PollTask {
    pub config: PollConfig,
    pub handler: Arc<dyn PollHandler>,
    pub current_interval: Duration,
    pub consecutive_empty: u32,
    pub consecutive_errors: u32,
    pub retry_count: u32,
    /// The current error streak already reached `on_error`.
    pub error_reported: bool,
    pub last_activity: Instant,
    pub last_success: Option<Instant>,
    pub in_flight: Option<InFlight>,
    pub tick_timer: Option<ScheduledTimer>,
    pub retry_timer: Option<ScheduledTimer>,
}

impl PollTask {
    pub fn new(config: PollConfig, handler: Arc<dyn PollHandler>) -> Self {
        Self {
            current_interval: config.base_interval(),
            config,
            handler,
            consecutive_empty: 0,
            consecutive_errors: 0,
            retry_count: 0,
            error_reported: false,
            last_activity: Instant::now(),
            last_success: None,
            in_flight: None,
            tick_timer: None,
            retry_timer: None,
        }
    }

    pub fn reset_interval(&mut self) {
        self.current_interval = self.config.base_interval();
        self.consecutive_empty = 0;
        self.last_activity = Instant::now();
    }

    pub fn is_paused(&self, env: EnvironmentState) -> bool {
        should_pause(&self.config, env)
    }

    /// Compute the next tick delay and store it as the current interval.
    pub fn next_interval(&mut self, env: EnvironmentState) -> Duration {
        let next = calculate_interval(
            &self.config,
            env,
            IntervalInputs {
                current: self.current_interval,
                consecutive_empty: self.consecutive_empty,
                since_activity: self.last_activity.elapsed(),
            },
        );
        self.current_interval = next;
        next
    }

    /// Abort both timers and cancel any in-flight request.
    ///
    /// Returns `true` when a request was cancelled.
    pub fn halt(&mut self) -> bool {
        if let Some(timer) = self.tick_timer.take() {
            timer.handle.abort();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.handle.abort();
        }
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn record_success(&mut self, significant: bool) {
        self.consecutive_errors = 0;
        self.retry_count = 0;
        self.error_reported = false;
        self.last_success = Some(Instant::now());

        if significant {
            self.reset_interval();
        } else {
            self.consecutive_empty = self.consecutive_empty.saturating_add(1);
        }
    }

    pub fn record_failure(&mut self) -> FailureAction {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);

        if self.config.retry_on_error && self.consecutive_errors <= self.config.max_retries {
            self.retry_count = self.retry_count.saturating_add(1);
            return FailureAction::Retry(retry_delay(self.retry_count));
        }

        if self.error_reported {
            FailureAction::Absorb
        } else {
            self.error_reported = true;
            FailureAction::Report
        }
    }

    pub fn status(&self, env: EnvironmentState) -> TaskStatus {
        TaskStatus {
            enabled: self.config.enabled,
            current_interval_ms: u64::try_from(self.current_interval.as_millis())
                .unwrap_or(u64::MAX),
            consecutive_empty: self.consecutive_empty,
            consecutive_errors: self.consecutive_errors,
            retry_count: self.retry_count,
            last_activity_ms: epoch_millis_of(self.last_activity),
            last_success_ms: self.last_success.map(epoch_millis_of),
            active_request: self.in_flight.is_some(),
            paused: self.is_paused(env),
        }
    }
}

/// Read-only snapshot of one task, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub enabled: bool,
    pub current_interval_ms: u64,
    pub consecutive_empty: u32,
    pub consecutive_errors: u32,
    pub retry_count: u32,
    /// Unix epoch milliseconds of the last significant response (or
    /// registration).
    pub last_activity_ms: u64,
    /// Unix epoch milliseconds of the last successful response.
    pub last_success_ms: Option<u64>,
    /// A request is outstanding.
    pub active_request: bool,
    /// The environment currently suspends this task.
    pub paused: bool,
}

/// Returns current UTC milliseconds since epoch.
fn now_epoch_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

fn epoch_millis_of(instant: Instant) -> u64 {
    let age = u64::try_from(instant.elapsed().as_millis()).unwrap_or(u64::MAX);
    now_epoch_millis().saturating_sub(age)
}
