//! Per-agent views as exposed to consumers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Opaque numeric key/value snapshot reported by an agent (cpu, memory, ...).
pub type Metrics = BTreeMap<String, f64>;

/// Status an agent reported about itself, independent of heartbeat timing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ReportedStatus {
    /// Free-form status word, e.g. `error`, `busy`, `maintenance`.
    pub status: String,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub message: Option<String>,
    pub reported_at: DateTime<Utc>,
}

/// Read-only view of one agent at the instant a snapshot was taken.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AgentView {
    pub agent_id: String,
    /// Derived: channel connected and last heartbeat within the liveness window.
    pub online: bool,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_metrics: Metrics,
    pub event_count: u64,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub reported_status: Option<ReportedStatus>,
    pub first_seen_at: DateTime<Utc>,
}

impl AgentView {
    /// Look up a single metric value.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.last_metrics.get(name).copied()
    }

    /// Whether the agent's own status report says something is wrong.
    pub fn reports_error(&self) -> bool {
        self.reported_status
            .as_ref()
            .is_some_and(|s| s.status.eq_ignore_ascii_case("error"))
    }
}
