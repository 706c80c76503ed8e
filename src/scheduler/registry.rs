//! The poll registry: public lifecycle API and environment listeners.
//!
//! [`PollRegistry`] is a cheap, cloneable handle. The host constructs one and
//! passes it to whatever needs to register tasks; there is no global
//! instance. All methods are synchronous and never wait on the network.
//!
//! # Lifetime
//!
//! Construction spawns two listener tasks (network, visibility) on the
//! current tokio runtime; they run until [`destroy`](PollRegistry::destroy)
//! or until the last handle is dropped. Timers hold only weak references, so
//! dropping every handle tears down all polling.
//!
//! A handler that keeps a strong [`PollRegistry`] creates a reference cycle
//! through the registry's own task table, and the tasks then outlive every
//! outside handle. Such a registry must be torn down with `destroy`.
//! Handlers that call back into the registry should capture a
//! [`WeakPollRegistry`] from [`downgrade`](PollRegistry::downgrade) instead.

use super::runner::{poll_immediately, start_task, stop_task};
use super::task::{PollTask, TaskStatus};
use crate::config::{PollConfig, PollConfigPatch};
use crate::environment::{EnvironmentSignals, EnvironmentState};
use crate::error::{PollError, Result};
use crate::handler::PollHandler;
use crate::interval::MIN_INTERVAL_MS;
use crate::request::RequestExecutor;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) struct State {
    pub tasks: HashMap<String, PollTask>,
    pub env: EnvironmentState,
    pub destroyed: bool,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    pub executor: Arc<dyn RequestExecutor>,
    /// Parent of every request token; cancelled on teardown.
    pub shutdown: CancellationToken,
    /// Source of timer sequence numbers and request attempt ids.
    pub next_seq: AtomicU64,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in state.tasks.values_mut() {
            task.halt();
        }
    }
}

/// Registry of adaptive polling tasks.
#[derive(Clone)]
pub struct PollRegistry {
    shared: Arc<Shared>,
}

/// Non-owning registry handle, for handlers that call back into their
/// registry.
#[derive(Clone)]
pub struct WeakPollRegistry {
    shared: Weak<Shared>,
}

impl WeakPollRegistry {
    /// The registry, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<PollRegistry> {
        self.shared.upgrade().map(|shared| PollRegistry { shared })
    }
}

impl std::fmt::Debug for WeakPollRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakPollRegistry")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for PollRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PollRegistry")
            .field("tasks", &state.tasks.len())
            .field("env", &state.env)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl PollRegistry {
    /// Create a registry issuing requests through `executor`.
    ///
    /// Reads the initial environment from `signals` and spawns the two
    /// transition listeners, so this must be called inside a tokio runtime.
    pub fn new(executor: Arc<dyn RequestExecutor>, signals: EnvironmentSignals) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: HashMap::new(),
                env: signals.current(),
                destroyed: false,
            }),
            executor,
            shutdown: CancellationToken::new(),
            next_seq: AtomicU64::new(1),
        });

        let EnvironmentSignals {
            network,
            visibility,
        } = signals;
        let shutdown = shared.shutdown.clone();
        tokio::spawn(watch_signal(
            Arc::downgrade(&shared),
            network,
            shutdown.clone(),
            Signal::Network,
        ));
        tokio::spawn(watch_signal(
            Arc::downgrade(&shared),
            visibility,
            shutdown,
            Signal::Visibility,
        ));

        let env = shared.lock().env;
        info!(
            online = env.online,
            visible = env.visible,
            "poll registry initialized"
        );
        Self { shared }
    }

    /// A handle that does not keep the registry alive.
    pub fn downgrade(&self) -> WeakPollRegistry {
        WeakPollRegistry {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a task, replacing any task with the same id.
    ///
    /// The replaced task is stopped and its adaptive state discarded. The
    /// new task starts immediately when `config.enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Config`] if `config` fails validation, and
    /// [`PollError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn register(
        &self,
        id: impl Into<String>,
        config: PollConfig,
        handler: Arc<dyn PollHandler>,
    ) -> Result<()> {
        let id = id.into();
        config.validate()?;

        let mut state = self.shared.lock();
        if state.destroyed {
            return Err(PollError::Destroyed);
        }
        if let Some(mut previous) = state.tasks.remove(&id) {
            previous.halt();
            debug!(task = %id, "replacing existing polling task");
        }

        let enabled = config.enabled;
        info!(
            task = %id,
            url = %config.request.url,
            interval_ms = config.interval_ms,
            max_interval_ms = config.max_interval_ms,
            enabled,
            "registered polling task"
        );
        state.tasks.insert(id.clone(), PollTask::new(config, handler));
        if enabled {
            start_task(&self.shared, &mut state, &id);
        }
        Ok(())
    }

    /// Enable a task and schedule its next tick. Returns `false` if unknown.
    ///
    /// Pending timers are discarded and an in-flight request is cancelled
    /// without being counted as an error.
    pub fn start(&self, id: &str) -> bool {
        let mut state = self.shared.lock();
        start_task(&self.shared, &mut state, id)
    }

    /// Disable a task. Returns `false` if unknown.
    ///
    /// Clears both timers and cancels any in-flight request; the handler's
    /// `on_error` is not called for the cancellation.
    pub fn stop(&self, id: &str) -> bool {
        let mut state = self.shared.lock();
        stop_task(&mut state, id)
    }

    /// Shallow-merge `patch` into a task's config.
    ///
    /// A running task (enabled with a pending tick) restarts so the new
    /// policy applies from the next tick. A patch that flips `enabled`
    /// starts or stops the task. Returns `Ok(false)` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Config`] if the merged config is invalid; the
    /// task keeps its previous config.
    pub fn update_config(&self, id: &str, patch: &PollConfigPatch) -> Result<bool> {
        let mut state = self.shared.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return Ok(false);
        };

        let merged = patch.apply_to(&task.config);
        merged.validate()?;

        let was_enabled = task.config.enabled;
        let running = was_enabled && task.tick_timer.is_some();
        let enable = merged.enabled;
        task.config = merged;
        // A lowered ceiling applies even while paused or in flight.
        let floor = Duration::from_millis(MIN_INTERVAL_MS);
        task.current_interval = task
            .current_interval
            .clamp(floor, task.config.max_interval().max(floor));
        debug!(task = %id, "polling config updated");

        if !enable {
            if was_enabled {
                stop_task(&mut state, id);
            }
        } else if running || !was_enabled {
            start_task(&self.shared, &mut state, id);
        }
        Ok(true)
    }

    /// Execute a task now instead of waiting for its timer.
    ///
    /// Returns `false` if the task is unknown or disabled.
    pub fn poll_now(&self, id: &str) -> bool {
        let mut state = self.shared.lock();
        poll_immediately(&self.shared, &mut state, id)
    }

    /// Drop a task's interval back to its base and clear the empty streak.
    ///
    /// Call this when something outside the poll loop proves there is fresh
    /// data. Returns `false` if unknown.
    pub fn reset_interval(&self, id: &str) -> bool {
        let mut state = self.shared.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return false;
        };
        task.reset_interval();
        debug!(
            task = %id,
            interval_ms = task.config.interval_ms,
            "polling interval reset"
        );
        true
    }

    /// Stop and delete a task. Returns `false` if unknown.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.shared.lock();
        if !stop_task(&mut state, id) {
            return false;
        }
        state.tasks.remove(id);
        info!(task = %id, "removed polling task");
        true
    }

    /// Snapshot of every task, keyed by id.
    pub fn status(&self) -> BTreeMap<String, TaskStatus> {
        let state = self.shared.lock();
        state
            .tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.status(state.env)))
            .collect()
    }

    /// Snapshot of one task.
    pub fn task_status(&self, id: &str) -> Option<TaskStatus> {
        let state = self.shared.lock();
        state.tasks.get(id).map(|task| task.status(state.env))
    }

    /// Current network and visibility values as last seen by the listeners.
    pub fn environment(&self) -> EnvironmentState {
        self.shared.lock().env
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.lock().tasks.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn task_ids(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut ids: Vec<String> = state.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().tasks.is_empty()
    }

    /// Stop every task, clear the registry and stop the environment
    /// listeners. Further registrations fail with [`PollError::Destroyed`].
    pub fn destroy(&self) {
        let mut state = self.shared.lock();
        if state.destroyed {
            return;
        }
        for task in state.tasks.values_mut() {
            task.config.enabled = false;
            task.halt();
        }
        let count = state.tasks.len();
        state.tasks.clear();
        state.destroyed = true;
        self.shared.shutdown.cancel();
        info!(tasks = count, "poll registry destroyed");
    }

    fn on_network_change(&self, online: bool) {
        let mut state = self.shared.lock();
        state.env.online = online;
        info!(
            online,
            "network status changed: {}",
            if online { "online" } else { "offline" }
        );

        for id in enabled_ids(&state) {
            start_task(&self.shared, &mut state, &id);
        }
    }

    fn on_visibility_change(&self, visible: bool) {
        let mut state = self.shared.lock();
        state.env.visible = visible;
        info!(
            visible,
            "page visibility changed: {}",
            if visible { "visible" } else { "hidden" }
        );

        if !visible {
            return;
        }
        for id in enabled_ids(&state) {
            if let Some(task) = state.tasks.get_mut(&id) {
                task.reset_interval();
            }
            start_task(&self.shared, &mut state, &id);
        }
    }
}

fn enabled_ids(state: &State) -> Vec<String> {
    state
        .tasks
        .iter()
        .filter(|(_, task)| task.config.enabled)
        .map(|(id, _)| id.clone())
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Network,
    Visibility,
}

/// Listen for transitions on one signal until teardown.
async fn watch_signal(
    weak: Weak<Shared>,
    mut rx: watch::Receiver<bool>,
    shutdown: CancellationToken,
    signal: Signal,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!(?signal, "environment signal source closed");
                    break;
                }
                let value = *rx.borrow_and_update();
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let registry = PollRegistry { shared };
                match signal {
                    Signal::Network => registry.on_network_change(value),
                    Signal::Visibility => registry.on_visibility_change(value),
                }
            }
        }
    }
}
