//! smart-poll: adaptive polling scheduler.
//!
//! A [`PollRegistry`] runs named poll tasks against JSON endpoints. Each task
//! slows down while responses carry nothing new, snaps back to its base
//! interval when they do, retries failures with a short capped backoff and
//! suspends itself while the host is offline or hidden.
//!
//! # Architecture
//!
//! - **Request**: [`RequestExecutor`] issues one request; [`HttpExecutor`]
//!   is the reqwest implementation.
//! - **Environment**: [`EnvironmentController`] publishes network and
//!   visibility over watch channels; [`ConnectivityMonitor`] derives the
//!   network signal from a probe URL.
//! - **Interval**: pure functions computing the next delay and pause state.
//! - **Scheduler**: the registry, its timers and per-task counters.

pub mod config;
pub mod environment;
pub mod error;
pub mod handler;
pub mod http;
pub mod interval;
pub mod request;
pub mod scheduler;
pub mod significance;

pub use config::{HostConfig, PollConfig, PollConfigPatch, TaskDefinition};
pub use environment::{
    ConnectivityMonitor, EnvironmentController, EnvironmentSignals, EnvironmentState,
};
pub use error::{PollError, Result};
pub use handler::{PollCallbacks, PollHandler};
pub use http::HttpExecutor;
pub use request::{HttpMethod, RequestDescriptor, RequestExecutor, RequestFailure};
pub use scheduler::{PollRegistry, TaskStatus, WeakPollRegistry};
pub use significance::{FieldCheck, FieldRule, SignificanceSchema};
