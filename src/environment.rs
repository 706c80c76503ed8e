//! Global environment signals: network connectivity and page visibility.
//!
//! Both signals are `tokio::sync::watch` channels. The host owns an
//! [`EnvironmentController`] and flips the values as the outside world
//! changes; the registry receives the matching [`EnvironmentSignals`] once at
//! construction and listens for transitions for its whole lifetime.
//!
//! [`ConnectivityMonitor`] is a ready-made network source for headless hosts:
//! it probes a URL on a fixed period and publishes online/offline transitions.
//!
//! ```rust,ignore
//! let (env, signals) = EnvironmentController::new(true, true);
//! let registry = PollRegistry::new(executor.clone(), signals);
//! tokio::spawn(ConnectivityMonitor::new(executor, probe, env.clone(), cancel.child_token()).run());
//! ```

use crate::config::ConnectivityConfig;
use crate::request::{RequestDescriptor, RequestExecutor, RequestFailure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of both global signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Network is reachable.
    pub online: bool,
    /// The page/tab is in the foreground.
    pub visible: bool,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            online: true,
            visible: true,
        }
    }
}

/// Receiving side of the two signals, consumed by the registry.
#[derive(Debug, Clone)]
pub struct EnvironmentSignals {
    pub network: watch::Receiver<bool>,
    pub visibility: watch::Receiver<bool>,
}

impl EnvironmentSignals {
    /// Current values of both signals.
    pub fn current(&self) -> EnvironmentState {
        EnvironmentState {
            online: *self.network.borrow(),
            visible: *self.visibility.borrow(),
        }
    }
}

/// Sending side of the two signals, owned by the host.
#[derive(Debug, Clone)]
pub struct EnvironmentController {
    network: Arc<watch::Sender<bool>>,
    visibility: Arc<watch::Sender<bool>>,
}

impl EnvironmentController {
    /// Create a controller with initial values and the signals to hand to a
    /// registry.
    pub fn new(online: bool, visible: bool) -> (Self, EnvironmentSignals) {
        let (network_tx, network_rx) = watch::channel(online);
        let (visibility_tx, visibility_rx) = watch::channel(visible);
        let controller = Self {
            network: Arc::new(network_tx),
            visibility: Arc::new(visibility_tx),
        };
        let signals = EnvironmentSignals {
            network: network_rx,
            visibility: visibility_rx,
        };
        (controller, signals)
    }

    /// Publish the network status. Returns `true` when the value changed.
    ///
    /// Setting the current value again does not notify listeners.
    pub fn set_online(&self, online: bool) -> bool {
        self.network.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        })
    }

    /// Publish page visibility. Returns `true` when the value changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.visibility.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        })
    }

    pub fn state(&self) -> EnvironmentState {
        EnvironmentState {
            online: *self.network.borrow(),
            visible: *self.visibility.borrow(),
        }
    }
}

/// Probes a URL periodically and drives the network signal.
///
/// Any answer from the server, including an error status or an unparsable
/// body, proves the network is up. Only transport failures and deadline
/// expiry count as offline.
pub struct ConnectivityMonitor {
    executor: Arc<dyn RequestExecutor>,
    probe: RequestDescriptor,
    controller: EnvironmentController,
    cancel: CancellationToken,
    interval: Duration,
    timeout: Duration,
}

impl ConnectivityMonitor {
    /// Create a monitor. Call [`run`](Self::run) to start probing.
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        config: &ConnectivityConfig,
        controller: EnvironmentController,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            probe: RequestDescriptor::get(config.url.clone()),
            controller,
            cancel,
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// One probe. Returns whether the network looked reachable.
    pub async fn probe_once(&self) -> bool {
        let token = self.cancel.child_token();
        let outcome = tokio::select! {
            result = self.executor.execute(&self.probe, token.clone()) => result,
            _ = tokio::time::sleep(self.timeout) => {
                token.cancel();
                Err(RequestFailure::Timeout(
                    u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        };

        match outcome {
            Ok(_) => true,
            Err(RequestFailure::Status { .. } | RequestFailure::Malformed(_)) => true,
            Err(e) => {
                debug!(url = %self.probe.url, error = %e, "connectivity probe failed");
                false
            }
        }
    }

    /// Run the probe loop until the cancellation token is cancelled.
    pub async fn run(self) {
        info!(url = %self.probe.url, "connectivity monitor started");

        loop {
            let online = tokio::select! {
                _ = self.cancel.cancelled() => break,
                online = self.probe_once() => online,
            };

            if self.controller.set_online(online) {
                if online {
                    info!("connectivity restored");
                } else {
                    warn!(url = %self.probe.url, "connectivity lost");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("connectivity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Result<serde_json::Value, RequestFailure>>>);

    #[async_trait]
    impl RequestExecutor for Scripted {
        async fn execute(
            &self,
            _request: &RequestDescriptor,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, RequestFailure> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                Ok(serde_json::Value::Null)
            } else {
                script.remove(0)
            }
        }
    }

    fn probe_config() -> ConnectivityConfig {
        ConnectivityConfig {
            url: "http://localhost/health".into(),
            interval_ms: 1_000,
            timeout_ms: 500,
        }
    }

    #[test]
    fn controller_reports_changes_only() {
        let (env, signals) = EnvironmentController::new(true, true);
        assert!(!env.set_online(true));
        assert!(env.set_online(false));
        assert!(env.set_visible(false));
        assert_eq!(
            signals.current(),
            EnvironmentState {
                online: false,
                visible: false
            }
        );
        assert_eq!(env.state(), signals.current());
    }

    #[tokio::test]
    async fn unchanged_value_does_not_notify() {
        let (env, mut signals) = EnvironmentController::new(true, true);
        signals.network.mark_unchanged();
        env.set_online(true);
        assert!(!signals.network.has_changed().unwrap());
        env.set_online(false);
        assert!(signals.network.has_changed().unwrap());
    }

    #[tokio::test]
    async fn error_status_counts_as_online() {
        let (env, _signals) = EnvironmentController::new(true, true);
        let executor = Arc::new(Scripted(Mutex::new(vec![Err(RequestFailure::Status {
            status: 500,
            reason: "Internal Server Error".into(),
        })])));
        let monitor =
            ConnectivityMonitor::new(executor, &probe_config(), env, CancellationToken::new());
        assert!(monitor.probe_once().await);
    }

    #[tokio::test]
    async fn network_error_counts_as_offline() {
        let (env, _signals) = EnvironmentController::new(true, true);
        let executor = Arc::new(Scripted(Mutex::new(vec![Err(RequestFailure::Network(
            "connection refused".into(),
        ))])));
        let monitor =
            ConnectivityMonitor::new(executor, &probe_config(), env, CancellationToken::new());
        assert!(!monitor.probe_once().await);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_transitions_and_stops_on_cancel() {
        let (env, signals) = EnvironmentController::new(true, true);
        let executor = Arc::new(Scripted(Mutex::new(vec![
            Err(RequestFailure::Network("down".into())),
            Ok(serde_json::json!({})),
        ])));
        let cancel = CancellationToken::new();
        let monitor = ConnectivityMonitor::new(executor, &probe_config(), env, cancel.clone());
        let task = tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!signals.current().online);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(signals.current().online);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "monitor should finish after cancel");
    }
}
