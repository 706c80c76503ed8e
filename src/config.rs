//! Task policy and host configuration with sensible defaults.
//!
//! [`PollConfig`] is the per-task request descriptor plus timing policy.
//! Every field has a default, so a partial TOML table merges over the
//! defaults. [`PollConfigPatch`] is the shallow partial update accepted by
//! [`PollRegistry::update_config`](crate::PollRegistry::update_config).
//!
//! [`HostConfig`] is the file loaded by the `smart-poll-host` binary.

use crate::error::{PollError, Result};
use crate::interval::MIN_INTERVAL_MS;
use crate::request::RequestDescriptor;
use crate::significance::SignificanceSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Request descriptor and adaptive policy for one polling task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// What to request on every tick.
    #[serde(flatten)]
    pub request: RequestDescriptor,
    /// Base interval in milliseconds. The interval returns here whenever new
    /// data is seen.
    pub interval_ms: u64,
    /// Upper bound for the adaptive interval in milliseconds.
    pub max_interval_ms: u64,
    /// Exponential backoff multiplier. Empty-response growth uses a fixed
    /// factor of 1.5; this value is kept for configuration compatibility.
    pub backoff_factor: f64,
    /// Retries allowed per error streak before the handler is told.
    pub max_retries: u32,
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Pause while the page is hidden.
    pub pause_on_blur: bool,
    /// Pause while the network is offline.
    pub pause_offline: bool,
    /// Retry failed requests with a short exponential delay.
    pub retry_on_error: bool,
    /// Start the task as soon as it is registered.
    pub enabled: bool,
    /// Caller-declared significance rules. `None` uses the default heuristic.
    pub significance: Option<SignificanceSchema>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            request: RequestDescriptor::default(),
            interval_ms: 3_000,
            max_interval_ms: 30_000,
            backoff_factor: 2.0,
            max_retries: 3,
            timeout_ms: 10_000,
            pause_on_blur: true,
            pause_offline: true,
            retry_on_error: true,
            enabled: true,
            significance: None,
        }
    }
}

impl PollConfig {
    /// Default policy for the given request.
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            ..Default::default()
        }
    }

    /// Default policy for a `GET` of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(RequestDescriptor::get(url))
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_max_interval_ms(mut self, max_interval_ms: u64) -> Self {
        self.max_interval_ms = max_interval_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_significance(mut self, schema: SignificanceSchema) -> Self {
        self.significance = Some(schema);
        self
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `url` must not be empty
    /// - `interval_ms` must be at least 1000
    /// - `max_interval_ms` must be >= `interval_ms`
    /// - `timeout_ms` must be greater than 0
    /// - `backoff_factor` must be finite and >= 1.0
    pub fn validate(&self) -> Result<()> {
        if self.request.url.trim().is_empty() {
            return Err(PollError::Config("url must not be empty".into()));
        }
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(PollError::Config(format!(
                "interval_ms must be >= {MIN_INTERVAL_MS}"
            )));
        }
        if self.max_interval_ms < self.interval_ms {
            return Err(PollError::Config(
                "max_interval_ms must be >= interval_ms".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(PollError::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(PollError::Config(
                "backoff_factor must be a finite number >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Shallow partial update for a [`PollConfig`].
///
/// `request` replaces the whole descriptor when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfigPatch {
    pub request: Option<RequestDescriptor>,
    pub interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub pause_on_blur: Option<bool>,
    pub pause_offline: Option<bool>,
    pub retry_on_error: Option<bool>,
    pub enabled: Option<bool>,
    pub significance: Option<SignificanceSchema>,
}

impl PollConfigPatch {
    /// Returns a copy of `base` with every field present in the patch applied.
    pub fn apply_to(&self, base: &PollConfig) -> PollConfig {
        let mut merged = base.clone();
        if let Some(request) = &self.request {
            merged.request = request.clone();
        }
        if let Some(v) = self.interval_ms {
            merged.interval_ms = v;
        }
        if let Some(v) = self.max_interval_ms {
            merged.max_interval_ms = v;
        }
        if let Some(v) = self.backoff_factor {
            merged.backoff_factor = v;
        }
        if let Some(v) = self.max_retries {
            merged.max_retries = v;
        }
        if let Some(v) = self.timeout_ms {
            merged.timeout_ms = v;
        }
        if let Some(v) = self.pause_on_blur {
            merged.pause_on_blur = v;
        }
        if let Some(v) = self.pause_offline {
            merged.pause_offline = v;
        }
        if let Some(v) = self.retry_on_error {
            merged.retry_on_error = v;
        }
        if let Some(v) = self.enabled {
            merged.enabled = v;
        }
        if let Some(schema) = &self.significance {
            merged.significance = Some(schema.clone());
        }
        merged
    }
}

/// A task entry in the host configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Registry key.
    pub id: String,
    #[serde(flatten)]
    pub config: PollConfig,
}

/// Optional reachability probe driving the network signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// URL probed with a `GET`. Any response, even an error status, counts as
    /// online; only transport failures count as offline.
    pub url: String,
    /// Probe period in milliseconds.
    pub interval_ms: u64,
    /// Probe deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval_ms: 15_000,
            timeout_ms: 5_000,
        }
    }
}

/// Configuration file for the `smart-poll-host` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Reachability probe. Without one the host assumes it is always online.
    pub connectivity: Option<ConnectivityConfig>,
    /// Tasks to register at startup.
    pub tasks: Vec<TaskDefinition>,
}

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PollError::Config(e.to_string()))
    }

    /// Returns the default config file path: `~/.config/smart-poll/tasks.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("smart-poll").join("tasks.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("smart-poll")
                .join("tasks.toml")
        } else {
            PathBuf::from("/tmp/smart-poll/tasks.toml")
        }
    }

    /// Validates every task and the probe section.
    ///
    /// The host issues requests through [`HttpExecutor`](crate::HttpExecutor),
    /// so every URL here must be an absolute `http` or `https` URL.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(PollError::Config("task id must not be empty".into()));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(PollError::Config(format!("duplicate task id '{}'", task.id)));
            }
            task.config
                .validate()
                .and_then(|()| check_http_url("url", &task.config.request.url))
                .map_err(|e| match e {
                    PollError::Config(msg) => {
                        PollError::Config(format!("task '{}': {msg}", task.id))
                    }
                    other => other,
                })?;
        }
        if let Some(probe) = &self.connectivity {
            check_http_url("connectivity.url", &probe.url)?;
            if probe.interval_ms == 0 || probe.timeout_ms == 0 {
                return Err(PollError::Config(
                    "connectivity interval_ms and timeout_ms must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }
}

fn check_http_url(field: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| PollError::Config(format!("{field} '{raw}' is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(PollError::Config(format!(
            "{field} must use http or https, got '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::request::HttpMethod;

    #[test]
    fn default_config_has_documented_values() {
        let config = PollConfig::default();
        assert_eq!(config.interval_ms, 3_000);
        assert_eq!(config.max_interval_ms, 30_000);
        assert_eq!(config.backoff_factor, 2.0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_ms, 10_000);
        assert!(config.pause_on_blur);
        assert!(config.pause_offline);
        assert!(config.retry_on_error);
        assert!(config.enabled);
        assert!(config.significance.is_none());
        assert_eq!(config.request.method, HttpMethod::Get);
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(PollConfig::get("http://localhost/poll").validate().is_ok());
    }

    #[test]
    fn empty_url_rejected() {
        let err = PollConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn sub_second_interval_rejected() {
        let err = PollConfig::get("http://x")
            .with_interval_ms(500)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn max_below_base_rejected() {
        let err = PollConfig::get("http://x")
            .with_interval_ms(5_000)
            .with_max_interval_ms(4_000)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_interval_ms"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PollConfig::get("http://x")
            .with_timeout_ms(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn nan_backoff_rejected() {
        let config = PollConfig {
            backoff_factor: f64::NAN,
            ..PollConfig::get("http://x")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        let config: PollConfig = toml::from_str(
            r#"
            url = "http://localhost/chat/api/messages/global/"
            interval_ms = 5000
            pause_on_blur = false
            "#,
        )
        .unwrap();
        assert_eq!(config.interval_ms, 5_000);
        assert_eq!(config.max_interval_ms, 30_000);
        assert!(!config.pause_on_blur);
        assert!(config.pause_offline);
        assert_eq!(
            config.request.url,
            "http://localhost/chat/api/messages/global/"
        );
    }

    #[test]
    fn patch_is_shallow_and_replaces_request_wholesale() {
        let base = PollConfig::new(
            RequestDescriptor::get("http://a").with_header("X-Token", "abc"),
        );
        let patch = PollConfigPatch {
            request: Some(RequestDescriptor::get("http://b")),
            max_interval_ms: Some(60_000),
            ..Default::default()
        };
        let merged = patch.apply_to(&base);
        assert_eq!(merged.request.url, "http://b");
        assert!(merged.request.headers.is_empty());
        assert_eq!(merged.max_interval_ms, 60_000);
        assert_eq!(merged.interval_ms, base.interval_ms);
    }

    #[test]
    fn empty_patch_is_identity() {
        let base = PollConfig::get("http://a").with_max_retries(7);
        assert_eq!(PollConfigPatch::default().apply_to(&base), base);
    }

    #[test]
    fn host_config_loads_tasks_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tasks.toml");
        std::fs::write(
            &path,
            r#"
            [connectivity]
            url = "http://localhost/health"

            [[tasks]]
            id = "global_chat_notifications"
            url = "http://localhost/chat/api/messages/global/?last_id=0"
            interval_ms = 5000
            max_interval_ms = 30000

            [tasks.headers]
            Accept = "application/json"

            [[tasks]]
            id = "dashboard"
            url = "http://localhost/dashboard/api/stats/"
            method = "POST"
            body = "{}"
            "#,
        )
        .unwrap();

        let config = HostConfig::from_file(&path).expect("load");
        assert!(config.validate().is_ok());
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].config.interval_ms, 5_000);
        assert_eq!(
            config.tasks[0].config.request.headers.get("Accept").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(config.tasks[1].config.request.method, HttpMethod::Post);
        let probe = config.connectivity.expect("probe");
        assert_eq!(probe.interval_ms, 15_000);
    }

    #[test]
    fn host_config_rejects_duplicate_ids() {
        let config = HostConfig {
            connectivity: None,
            tasks: vec![
                TaskDefinition {
                    id: "a".into(),
                    config: PollConfig::get("http://a"),
                },
                TaskDefinition {
                    id: "a".into(),
                    config: PollConfig::get("http://b"),
                },
            ],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn host_config_reports_task_id_on_invalid_policy() {
        let config = HostConfig {
            connectivity: None,
            tasks: vec![TaskDefinition {
                id: "broken".into(),
                config: PollConfig::get("http://a").with_interval_ms(10),
            }],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn host_config_requires_absolute_http_urls() {
        let relative = HostConfig {
            connectivity: None,
            tasks: vec![TaskDefinition {
                id: "chat".into(),
                config: PollConfig::get("/chat/api/messages/"),
            }],
        };
        let err = relative.validate().unwrap_err();
        assert!(err.to_string().contains("task 'chat'"));

        let ftp_probe = HostConfig {
            connectivity: Some(ConnectivityConfig {
                url: "ftp://localhost/health".into(),
                ..Default::default()
            }),
            tasks: Vec::new(),
        };
        let err = ftp_probe.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = HostConfig::from_file(Path::new("/nonexistent/smart-poll.toml")).unwrap_err();
        assert!(matches!(err, PollError::Io(_)));
    }
}
