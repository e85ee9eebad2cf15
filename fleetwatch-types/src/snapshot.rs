//! Snapshot - a point-in-time view of a telemetry channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{AgentView, ConnectionState, LogLevel, LogRecord, SchemaVersion};

/// Counters describing what the channel has seen since it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChannelStats {
    /// Frames read from the transport, well-formed or not.
    pub frames_received: u64,
    /// Frames that could not be decoded.
    pub malformed_frames: u64,
    /// Well-formed frames with a kind the channel does not understand.
    pub unknown_frames: u64,
    /// Reconnect attempts scheduled after a lost or failed connection.
    pub reconnect_attempts: u64,
    /// Log records dropped from the front of the ring buffer.
    pub evicted_logs: u64,
    /// Delay before the pending reconnect attempt, if one is scheduled.
    pub retry_delay_ms: Option<u64>,
}

/// An immutable, internally consistent view of the channel at one instant.
///
/// Every event that was fully processed before the snapshot was taken is
/// reflected in both `agents` and `logs`; no event is half-visible.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Snapshot {
    /// Schema version for forward compatibility.
    pub schema: SchemaVersion,

    /// Monotonic snapshot counter, bumped on every state change.
    pub version: u64,

    /// Clock reading used for liveness derivation.
    pub taken_at: DateTime<Utc>,

    pub connection: ConnectionState,

    /// Agents keyed by identifier.
    pub agents: BTreeMap<String, AgentView>,

    /// Log history, oldest first.
    pub logs: Vec<LogRecord>,

    pub stats: ChannelStats,
}

impl Snapshot {
    /// Look up a single agent.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentView> {
        self.agents.get(agent_id)
    }

    /// Whether the agent is currently considered online.
    pub fn is_agent_online(&self, agent_id: &str) -> bool {
        self.agents.get(agent_id).is_some_and(|a| a.online)
    }

    /// Number of agents currently online.
    pub fn online_count(&self) -> usize {
        self.agents.values().filter(|a| a.online).count()
    }

    /// Log records referring to one agent, oldest first.
    pub fn logs_for<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a LogRecord> + 'a {
        self.logs.iter().filter(move |r| r.agent_id == agent_id)
    }

    /// Log records at or above the given level.
    pub fn logs_at_least(&self, level: LogLevel) -> impl Iterator<Item = &LogRecord> + '_ {
        self.logs.iter().filter(move |r| r.level >= level)
    }

    /// The most recently appended log record.
    pub fn latest_log(&self) -> Option<&LogRecord> {
        self.logs.last()
    }
}
