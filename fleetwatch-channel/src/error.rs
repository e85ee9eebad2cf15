//! Error types for the telemetry channel.

use thiserror::Error;

/// Errors raised by a transport while connecting or reading.
///
/// Everything except [`TransportError::Rejected`] is recovered by the
/// supervisor through backoff and reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The connection broke while reading.
    #[error("I/O error: {0}")]
    Io(String),

    /// Connecting took longer than the configured I/O timeout.
    #[error("Connection attempt timed out")]
    Timeout,

    /// The server refused our credentials. Terminal.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// The server closed the connection.
    #[error("Connection closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Whether reconnecting could help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            std::io::ErrorKind::ConnectionRefused => TransportError::Connect(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// A frame that could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not JSON, or not a JSON object.
    #[error("Failed to parse frame: {0}")]
    Json(String),

    /// A required field is absent or has the wrong type.
    #[error("Missing or invalid field `{0}`")]
    MissingField(&'static str),

    /// The payload does not match what the declared kind requires.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    /// The timestamp is not ISO-8601.
    #[error("Invalid timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// Invalid channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration: {field} {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Errors returned when building a [`TelemetryChannel`](crate::TelemetryChannel).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No transport was given to the builder.
    #[error("No transport configured")]
    MissingTransport,

    /// The channel spawns background tasks and must be built inside a tokio runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejection_is_terminal() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Closed("bye".into()).is_retryable());
        assert!(!TransportError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn io_errors_map_by_kind() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(TransportError::from(refused), TransportError::Connect(_)));

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(timed_out), TransportError::Timeout);
    }

    #[test]
    fn config_error_message() {
        let err = ConfigError::new("log_capacity", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: log_capacity must be greater than zero"
        );
    }
}
