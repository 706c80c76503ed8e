//! Tick scheduling and request execution.
//!
//! Every timer is a spawned tokio task holding only a weak reference to the
//! registry. A tick runs in two locked phases around the request: claim
//! (pause and overlap checks, mark in flight) and settle (update counters,
//! schedule a retry). Handlers run between settle and the reschedule, with
//! the lock released.

use super::registry::{Shared, State};
use super::task::{FailureAction, InFlight, ScheduledTimer};
use crate::request::RequestFailure;
use crate::significance::SignificanceSchema;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which slot a timer occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerSlot {
    Tick,
    Retry,
}

/// Enable a task and schedule its next tick, discarding pending timers and
/// cancelling any in-flight request first.
pub(crate) fn start_task(shared: &Arc<Shared>, state: &mut State, id: &str) -> bool {
    let Some(task) = state.tasks.get_mut(id) else {
        return false;
    };
    if task.halt() {
        debug!(task = %id, "in-flight request cancelled by restart");
    }
    task.config.enabled = true;
    schedule_next(shared, state, id);
    debug!(task = %id, "started polling");
    true
}

/// Disable a task, clear its timers and cancel any in-flight request.
pub(crate) fn stop_task(state: &mut State, id: &str) -> bool {
    let Some(task) = state.tasks.get_mut(id) else {
        return false;
    };
    task.config.enabled = false;
    if task.halt() {
        debug!(task = %id, "in-flight request cancelled by stop");
    }
    debug!(task = %id, "stopped polling");
    true
}

/// Arm the tick timer for a task.
///
/// Does nothing when the task is disabled, when a tick is already pending,
/// or when the environment pauses the task. A paused task is only rearmed by
/// an environment transition.
pub(crate) fn schedule_next(shared: &Arc<Shared>, state: &mut State, id: &str) {
    let env = state.env;
    let Some(task) = state.tasks.get_mut(id) else {
        return;
    };
    if !task.config.enabled || task.tick_timer.is_some() {
        return;
    }
    if task.is_paused(env) {
        debug!(
            task = %id,
            online = env.online,
            visible = env.visible,
            "polling paused"
        );
        return;
    }

    let delay = task.next_interval(env);
    task.tick_timer = Some(spawn_timer(shared, id, delay, TimerSlot::Tick));
    debug!(
        task = %id,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "next poll scheduled"
    );
}

/// Replace any pending tick with an immediate one.
pub(crate) fn poll_immediately(shared: &Arc<Shared>, state: &mut State, id: &str) -> bool {
    let Some(task) = state.tasks.get_mut(id) else {
        return false;
    };
    if !task.config.enabled {
        return false;
    }
    if let Some(timer) = task.tick_timer.take() {
        timer.handle.abort();
    }
    task.tick_timer = Some(spawn_timer(shared, id, Duration::ZERO, TimerSlot::Tick));
    true
}

fn spawn_timer(shared: &Arc<Shared>, id: &str, delay: Duration, slot: TimerSlot) -> ScheduledTimer {
    let seq = shared.next_seq.fetch_add(1, Ordering::Relaxed);
    let weak = Arc::downgrade(shared);
    let id = id.to_owned();
    let handle = tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        execute(weak, id, slot, seq).await;
    })
    .abort_handle();
    ScheduledTimer { seq, handle }
}

/// Everything a tick needs once the lock is released.
struct Claim {
    attempt: u64,
    cancel: tokio_util::sync::CancellationToken,
    request: crate::request::RequestDescriptor,
    timeout: Duration,
    significance: Option<SignificanceSchema>,
    handler: Arc<dyn crate::handler::PollHandler>,
    executor: Arc<dyn crate::request::RequestExecutor>,
}

async fn execute(weak: Weak<Shared>, id: String, slot: TimerSlot, seq: u64) {
    let Some(claim) = claim(&weak, &id, slot, seq) else {
        return;
    };

    debug!(task = %id, url = %claim.request.url, method = %claim.request.method, "executing poll");

    let outcome = tokio::select! {
        biased;
        _ = claim.cancel.cancelled() => None,
        result = claim.executor.execute(&claim.request, claim.cancel.clone()) => Some(result),
        _ = tokio::time::sleep(claim.timeout) => {
            claim.cancel.cancel();
            Some(Err(RequestFailure::Timeout(
                u64::try_from(claim.timeout.as_millis()).unwrap_or(u64::MAX),
            )))
        }
    };

    let Some(outcome) = outcome else {
        debug!(task = %id, "poll aborted");
        settle_cancelled(&weak, &id, claim.attempt);
        return;
    };

    settle(&weak, &id, claim, outcome);
}

/// Phase one: validate the timer, check pause and overlap, mark in flight.
fn claim(weak: &Weak<Shared>, id: &str, slot: TimerSlot, seq: u64) -> Option<Claim> {
    let shared = weak.upgrade()?;
    let mut state = shared.lock();
    let env = state.env;
    let task = state.tasks.get_mut(id)?;

    let timer = match slot {
        TimerSlot::Tick => &mut task.tick_timer,
        TimerSlot::Retry => &mut task.retry_timer,
    };
    if timer.as_ref().map(|t| t.seq) != Some(seq) {
        return None;
    }
    *timer = None;

    if !task.config.enabled {
        return None;
    }
    if task.is_paused(env) {
        debug!(task = %id, "poll skipped while paused");
        return None;
    }
    if task.in_flight.is_some() {
        debug!(task = %id, "skipping overlapping poll");
        schedule_next(&shared, &mut state, id);
        return None;
    }

    let attempt = shared.next_seq.fetch_add(1, Ordering::Relaxed);
    let cancel = shared.shutdown.child_token();
    task.in_flight = Some(InFlight {
        attempt,
        cancel: cancel.clone(),
    });

    Some(Claim {
        attempt,
        cancel,
        request: task.config.request.clone(),
        timeout: task.config.timeout(),
        significance: task.config.significance.clone(),
        handler: Arc::clone(&task.handler),
        executor: Arc::clone(&shared.executor),
    })
}

/// The token fired without the task being halted (registry teardown).
fn settle_cancelled(weak: &Weak<Shared>, id: &str, attempt: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut state = shared.lock();
    let Some(task) = state.tasks.get_mut(id) else {
        return;
    };
    if task.in_flight.as_ref().map(|f| f.attempt) == Some(attempt) {
        task.in_flight = None;
    }
}

/// Phase two: apply the outcome, run the handler, reschedule.
///
/// Caller code (predicate and callbacks) runs outside the lock and behind
/// `catch_unwind`, so a panicking handler cannot end the task's loop.
fn settle(
    weak: &Weak<Shared>,
    id: &str,
    claim: Claim,
    outcome: Result<serde_json::Value, RequestFailure>,
) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    if !attempt_is_current(&shared, id, claim.attempt) {
        debug!(task = %id, "discarding response of cancelled poll");
        return;
    }

    let significant = match &outcome {
        Ok(payload) => {
            let from_handler = guarded(id, "is_significant", || {
                claim.handler.is_significant(payload)
            })
            .flatten();
            from_handler.unwrap_or_else(|| match &claim.significance {
                Some(schema) => schema.is_significant(payload),
                None => SignificanceSchema::default_heuristic().is_significant(payload),
            })
        }
        Err(_) => false,
    };

    let report = {
        let mut state = shared.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return;
        };
        if task.in_flight.as_ref().map(|f| f.attempt) != Some(claim.attempt) {
            // Stopped, restarted or re-registered while the request ran.
            debug!(task = %id, "discarding response of cancelled poll");
            return;
        }
        task.in_flight = None;

        match &outcome {
            Ok(_) => {
                task.record_success(significant);
                debug!(
                    task = %id,
                    significant,
                    empty_count = task.consecutive_empty,
                    "poll succeeded"
                );
                false
            }
            Err(failure) => {
                let action = task.record_failure();
                warn!(
                    task = %id,
                    error = %failure,
                    consecutive_errors = task.consecutive_errors,
                    "poll failed"
                );
                match action {
                    FailureAction::Retry(delay) => {
                        info!(
                            task = %id,
                            attempt = task.retry_count,
                            max_retries = task.config.max_retries,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "retrying poll"
                        );
                        if let Some(timer) = task.retry_timer.take() {
                            timer.handle.abort();
                        }
                        task.retry_timer =
                            Some(spawn_timer(&shared, id, delay, TimerSlot::Retry));
                        false
                    }
                    FailureAction::Report => true,
                    FailureAction::Absorb => false,
                }
            }
        }
    };

    match &outcome {
        Ok(payload) => {
            guarded(id, "on_success", || claim.handler.on_success(payload));
        }
        Err(failure) if report => {
            guarded(id, "on_error", || claim.handler.on_error(failure));
        }
        Err(_) => {}
    }

    let mut state = shared.lock();
    schedule_next(&shared, &mut state, id);
}

fn attempt_is_current(shared: &Shared, id: &str, attempt: u64) -> bool {
    let state = shared.lock();
    state
        .tasks
        .get(id)
        .and_then(|task| task.in_flight.as_ref())
        .is_some_and(|in_flight| in_flight.attempt == attempt)
}

/// Run caller code, turning a panic into a logged `None`.
fn guarded<T>(id: &str, callback: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            warn!(task = %id, callback, panic = %message, "poll handler panicked");
            None
        }
    }
}
