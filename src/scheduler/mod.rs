//! Adaptive polling scheduler.
//!
//! [`PollRegistry`] owns a set of named poll tasks. Each task fires on its
//! own timer, stretches its interval while responses carry nothing new,
//! retries failures with a short capped backoff and suspends itself while
//! the host is offline or hidden.

mod registry;
mod runner;
mod task;

pub use registry::{PollRegistry, WeakPollRegistry};
pub use task::TaskStatus;
