//! Log records kept in the channel's bounded history.

use core::fmt;

use chrono::{DateTime, Utc};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    #[default]
    Info,
    #[cfg_attr(feature = "serde", serde(alias = "warn"))]
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a level name as agents send it. Case-insensitive; accepts `warn`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Returns a short symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single entry in the log history. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LogRecord {
    /// Channel-wide arrival sequence, assigned when the record is appended.
    pub seq: u64,
    /// Agent the record refers to. Empty when a frame was too broken to tell.
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub event_type: Option<String>,
    pub message: String,
}

impl LogRecord {
    /// Create a record. The sequence number is assigned by the buffer on append.
    pub fn new(
        agent_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            agent_id: agent_id.into(),
            timestamp,
            level,
            event_type: None,
            message: message.into(),
        }
    }

    /// Attach an event type (e.g. `process_started`).
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }
}
