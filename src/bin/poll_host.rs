//! Headless polling host.
//!
//! Usage: `smart-poll-host [CONFIG]`
//!
//! Loads the task file (default `~/.config/smart-poll/tasks.toml`), registers
//! every task against the HTTP executor and logs each payload until Ctrl-C.
//! All tracing output goes to stderr.

use smart_poll::{
    ConnectivityMonitor, EnvironmentController, HostConfig, HttpExecutor, PollCallbacks,
    PollRegistry, RequestExecutor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(HostConfig::default_config_path);

    tracing::info!(config = %path.display(), "smart-poll-host starting");

    let config = HostConfig::from_file(&path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
    config.validate()?;

    let executor: Arc<dyn RequestExecutor> = Arc::new(HttpExecutor::new()?);
    let (environment, signals) = EnvironmentController::new(true, true);
    let registry = PollRegistry::new(Arc::clone(&executor), signals);

    let cancel = CancellationToken::new();
    let monitor = config.connectivity.as_ref().map(|probe| {
        let monitor = ConnectivityMonitor::new(
            Arc::clone(&executor),
            probe,
            environment.clone(),
            cancel.child_token(),
        );
        tokio::spawn(monitor.run())
    });

    for task in config.tasks {
        let id = task.id.clone();
        let on_ok = id.clone();
        let on_err = id.clone();
        let handler = PollCallbacks::new()
            .on_success(move |payload| tracing::info!(task = %on_ok, %payload, "poll payload"))
            .on_error(move |e| tracing::error!(task = %on_err, error = %e, "polling failed"))
            .into_handler();
        registry.register(id, task.config, handler)?;
    }

    tracing::info!(tasks = registry.len(), "polling started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    for (id, status) in registry.status() {
        tracing::info!(
            task = %id,
            interval_ms = status.current_interval_ms,
            empty = status.consecutive_empty,
            errors = status.consecutive_errors,
            "final task status"
        );
    }

    registry.destroy();
    cancel.cancel();
    if let Some(handle) = monitor {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "connectivity monitor task failed");
        }
    }

    tracing::info!("smart-poll-host shut down cleanly");
    Ok(())
}
