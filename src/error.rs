//! Error types for the polling scheduler.
//!
//! [`PollError`] covers configuration and construction failures returned by
//! the registry API. Request failures observed while polling are a separate
//! type, [`RequestFailure`](crate::request::RequestFailure), and never escape
//! the registry except through a task's handler.

/// Top-level error type for registry and host operations.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Invalid task or host configuration.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP client construction error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The registry was destroyed and accepts no new tasks.
    #[error("poll registry has been destroyed")]
    Destroyed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PollError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_config() {
        let err = PollError::Config("interval_ms must be >= 1000".into());
        assert_eq!(err.to_string(), "config error: interval_ms must be >= 1000");
    }

    #[test]
    fn display_http() {
        let err = PollError::Http("failed to build HTTP client".into());
        assert_eq!(err.to_string(), "HTTP error: failed to build HTTP client");
    }

    #[test]
    fn display_destroyed() {
        assert_eq!(
            PollError::Destroyed.to_string(),
            "poll registry has been destroyed"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PollError = io.into();
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PollError>();
    }
}
