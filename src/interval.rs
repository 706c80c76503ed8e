//! Adaptive interval arithmetic.
//!
//! Pure functions over a task's policy, its counters and the environment.
//! The registry calls [`calculate_interval`] every time it schedules a tick
//! and stores the result as the task's new current interval, so growth
//! compounds across ticks until it reaches `max_interval_ms`.

use crate::config::PollConfig;
use crate::environment::EnvironmentState;
use std::time::Duration;

/// Hard floor for any computed interval.
pub const MIN_INTERVAL_MS: u64 = 1_000;

/// Floor applied while offline for tasks that respect network status.
pub const OFFLINE_FLOOR_MS: u64 = 10_000;

/// Floor applied while hidden for tasks that respect visibility.
pub const HIDDEN_FLOOR_MS: u64 = 15_000;

/// Growth factor per consecutive empty response.
pub const EMPTY_GROWTH: f64 = 1.5;

/// Empty responses beyond this count stop increasing the exponent.
pub const EMPTY_EXPONENT_CAP: u32 = 5;

/// Idle time after which the interval is stretched once more.
pub const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Base delay for error retries.
const RETRY_BASE_MS: u64 = 1_000;

/// Ceiling for error retry delays.
const RETRY_MAX_MS: u64 = 5_000;

/// Inputs to one interval computation.
#[derive(Debug, Clone, Copy)]
pub struct IntervalInputs {
    /// The task's current interval.
    pub current: Duration,
    /// Consecutive insignificant responses.
    pub consecutive_empty: u32,
    /// Time since the task last saw significant data.
    pub since_activity: Duration,
}

/// Compute the next interval for a task.
///
/// Steps, in order:
/// 1. start from the current interval
/// 2. empty streak: multiply by `1.5^min(empty, 5)`, capped at max
/// 3. offline (and respected): at least 10 s
/// 4. hidden (and respected): at least 15 s
/// 5. idle for over 5 minutes: multiply by 1.5, capped at max
/// 6. clamp into `[1 s, max]`
pub fn calculate_interval(
    config: &PollConfig,
    env: EnvironmentState,
    inputs: IntervalInputs,
) -> Duration {
    let max_ms = config.max_interval_ms.max(MIN_INTERVAL_MS) as f64;
    let mut interval = inputs.current.as_millis() as f64;

    if inputs.consecutive_empty > 0 {
        let exponent = inputs.consecutive_empty.min(EMPTY_EXPONENT_CAP);
        interval = (interval * EMPTY_GROWTH.powi(exponent as i32)).min(max_ms);
    }

    if !env.online && config.pause_offline {
        interval = interval.max(OFFLINE_FLOOR_MS as f64);
    }

    if !env.visible && config.pause_on_blur {
        interval = interval.max(HIDDEN_FLOOR_MS as f64);
    }

    if inputs.since_activity > INACTIVITY_THRESHOLD {
        interval = (interval * EMPTY_GROWTH).min(max_ms);
    }

    let clamped = interval.clamp(MIN_INTERVAL_MS as f64, max_ms);
    Duration::from_millis(clamped.round() as u64)
}

/// Whether a task should stop scheduling under the current environment.
///
/// Only signals the task opted into count: a task with `pause_on_blur =
/// false` never pauses for visibility, and likewise for `pause_offline`.
pub fn should_pause(config: &PollConfig, env: EnvironmentState) -> bool {
    (config.pause_on_blur && !env.visible) || (config.pause_offline && !env.online)
}

/// Delay before retry number `retry_count` (1-based): `min(1000 * 2^n, 5000)` ms.
pub fn retry_delay(retry_count: u32) -> Duration {
    let factor = 1_u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_MS.saturating_mul(factor).min(RETRY_MAX_MS))
}
