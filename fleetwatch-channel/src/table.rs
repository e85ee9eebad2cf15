//! Agent state table: one record per agent, each behind its own lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetwatch_types::{AgentView, Metrics, ReportedStatus};
use parking_lot::{Mutex, RwLock};

/// Mutable state of one agent. `online` is derived, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub agent_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_metrics: Metrics,
    pub event_count: u64,
    pub reported_status: Option<ReportedStatus>,
}

impl AgentRecord {
    fn new(agent_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            first_seen_at: now,
            last_heartbeat_at: None,
            last_metrics: Metrics::new(),
            event_count: 0,
            reported_status: None,
        }
    }

    /// Record a heartbeat. The latest timestamp wins, so out-of-order
    /// heartbeats never move liveness backwards. Metrics are replaced whole.
    ///
    /// `at` must not be later than the time the heartbeat was received.
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>, metrics: Option<Metrics>) {
        self.last_heartbeat_at = Some(match self.last_heartbeat_at {
            Some(previous) => previous.max(at),
            None => at,
        });
        if let Some(metrics) = metrics {
            self.last_metrics = metrics;
        }
    }

    /// Consumer-facing copy with liveness filled in.
    pub fn view(&self, online: bool) -> AgentView {
        AgentView {
            agent_id: self.agent_id.clone(),
            online,
            last_heartbeat_at: self.last_heartbeat_at,
            last_metrics: self.last_metrics.clone(),
            event_count: self.event_count,
            reported_status: self.reported_status.clone(),
            first_seen_at: self.first_seen_at,
        }
    }
}

/// Liveness rule: the channel is connected and the last heartbeat is no
/// older than `window`.
pub fn is_live(
    last_heartbeat_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
    connected: bool,
) -> bool {
    let Some(last) = last_heartbeat_at else {
        return false;
    };
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    connected && now.signed_duration_since(last) <= window
}

/// Thread-safe table of agent records.
///
/// The map lock is only held to find or insert a record; updates lock the
/// individual record, so writes to different agents do not contend.
#[derive(Debug)]
pub struct AgentTable {
    agents: RwLock<HashMap<String, Arc<Mutex<AgentRecord>>>>,
    liveness_window: Duration,
}

impl AgentTable {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    fn get_or_create(&self, agent_id: &str, now: DateTime<Utc>) -> Arc<Mutex<AgentRecord>> {
        // Fast path: check if it exists
        {
            let agents = self.agents.read();
            if let Some(record) = agents.get(agent_id) {
                return record.clone();
            }
        }

        // Slow path: create it
        let mut agents = self.agents.write();
        agents
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentRecord::new(agent_id, now))))
            .clone()
    }

    /// Atomic read-modify-write of one record, creating it if absent.
    pub fn upsert<R>(&self, agent_id: &str, now: DateTime<Utc>, f: impl FnOnce(&mut AgentRecord) -> R) -> R {
        let record = self.get_or_create(agent_id, now);
        let mut guard = record.lock();
        f(&mut guard)
    }

    /// Copy of one record.
    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        let record = self.agents.read().get(agent_id).cloned()?;
        let guard = record.lock();
        Some(guard.clone())
    }

    /// Whether the agent is online at `now`.
    pub fn liveness(&self, agent_id: &str, now: DateTime<Utc>, connected: bool) -> bool {
        self.get(agent_id)
            .is_some_and(|r| is_live(r.last_heartbeat_at, now, self.liveness_window, connected))
    }

    /// Views of every agent, keyed by identifier.
    pub fn views(&self, now: DateTime<Utc>, connected: bool) -> BTreeMap<String, AgentView> {
        let records: Vec<Arc<Mutex<AgentRecord>>> = self.agents.read().values().cloned().collect();
        records
            .iter()
            .map(|record| {
                let guard = record.lock();
                let online = is_live(guard.last_heartbeat_at, now, self.liveness_window, connected);
                (guard.agent_id.clone(), guard.view(online))
            })
            .collect()
    }

    /// Identifiers of the agents online at `now`, sorted.
    pub fn online_ids(&self, now: DateTime<Utc>, connected: bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .views(now, connected)
            .into_values()
            .filter(|v| v.online)
            .map(|v| v.agent_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
