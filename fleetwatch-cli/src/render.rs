//! Plain-text rendering of snapshots for the terminal.

use chrono::{DateTime, Utc};
use fleetwatch_types::{AgentView, LogRecord, Snapshot};

/// One-line status, printed on every published snapshot.
pub fn summary_line(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "[{}] v{} agents={} online={} logs={} frames={} malformed={}",
        snapshot.connection,
        snapshot.version,
        snapshot.agents.len(),
        snapshot.online_count(),
        snapshot.logs.len(),
        snapshot.stats.frames_received,
        snapshot.stats.malformed_frames,
    );
    if let Some(delay) = snapshot.stats.retry_delay_ms {
        line.push_str(&format!(" retry_in={}ms", delay));
    }
    line
}

fn age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format!("{}s ago", (now - at).num_seconds().max(0)),
        None => "never".to_string(),
    }
}

fn agent_row(agent: &AgentView, now: DateTime<Utc>) -> String {
    let metrics = agent
        .last_metrics
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ");
    let status = agent
        .reported_status
        .as_ref()
        .map(|s| s.status.as_str())
        .unwrap_or("-");
    format!(
        "{:<20} {:<7} {:<12} events={:<6} status={:<10} {}",
        agent.agent_id,
        if agent.online { "online" } else { "offline" },
        age(agent.last_heartbeat_at, now),
        agent.event_count,
        status,
        metrics
    )
    .trim_end()
    .to_string()
}

/// One row per agent, sorted by identifier.
pub fn agent_table(snapshot: &Snapshot) -> String {
    if snapshot.agents.is_empty() {
        return "no agents seen yet".to_string();
    }
    snapshot
        .agents
        .values()
        .map(|agent| agent_row(agent, snapshot.taken_at))
        .collect::<Vec<_>>()
        .join("\n")
}

fn log_row(record: &LogRecord) -> String {
    let event_type = record
        .event_type
        .as_deref()
        .map(|t| format!(" [{}]", t))
        .unwrap_or_default();
    format!(
        "#{} {} {} {}{} {}",
        record.seq,
        record.timestamp.format("%H:%M:%S"),
        record.level.symbol(),
        if record.agent_id.is_empty() { "-" } else { record.agent_id.as_str() },
        event_type,
        record.message
    )
}

/// The newest `count` log records, oldest first.
pub fn recent_logs(snapshot: &Snapshot, count: usize) -> String {
    if snapshot.logs.is_empty() {
        return "log is empty".to_string();
    }
    let skip = snapshot.logs.len().saturating_sub(count);
    snapshot.logs[skip..].iter().map(log_row).collect::<Vec<_>>().join("\n")
}
