//! End-to-end behaviour of the channel against scripted transports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::timeout;

use crate::transport::{ChannelTransport, Connection, FrameSender, Transport};
use crate::{ChannelConfig, ConnectionState, LogLevel, ManualClock, Snapshot, TelemetryChannel, TransportError};

#[derive(Debug)]
enum Step {
    Refuse,
    Reject,
    /// Connect after a delay, then fail.
    Slow(Duration),
    /// Connect and deliver these frames, then stay open.
    Open(Vec<&'static str>),
    /// Connect, deliver these frames, then hang up.
    Brief(Vec<&'static str>),
}

#[derive(Debug, Default)]
struct Probe {
    attempts: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Counts attempts and open connections for as long as it lives.
struct LiveGuard(Arc<Probe>);

impl LiveGuard {
    fn new(probe: Arc<Probe>) -> Self {
        let live = probe.live.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_live.fetch_max(live, Ordering::SeqCst);
        Self(probe)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    probe: Arc<Probe>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let transport = Self {
            steps: Mutex::new(steps.into()),
            probe: probe.clone(),
        };
        (transport, probe)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.probe.attempts.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard::new(self.probe.clone());
        let step = self.steps.lock().pop_front().unwrap_or(Step::Refuse);
        match step {
            Step::Refuse => Err(TransportError::Connect("refused".to_string())),
            Step::Reject => Err(TransportError::Rejected("HTTP 401".to_string())),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Err(TransportError::Connect("too slow".to_string()))
            }
            Step::Open(frames) => Ok(Box::new(ScriptedConnection {
                frames: frames.into_iter().map(String::from).collect(),
                hang_up: false,
                _guard: guard,
            })),
            Step::Brief(frames) => Ok(Box::new(ScriptedConnection {
                frames: frames.into_iter().map(String::from).collect(),
                hang_up: true,
                _guard: guard,
            })),
        }
    }

    fn description(&self) -> &str {
        "scripted"
    }
}

struct ScriptedConnection {
    frames: VecDeque<String>,
    hang_up: bool,
    _guard: LiveGuard,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hang_up => Ok(None),
            None => std::future::pending::<Result<Option<String>, TransportError>>().await,
        }
    }
}

fn start() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        coalesce_window_ms: 5,
        tick_interval_ms: 20,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
        backoff_jitter: 0.0,
        ..ChannelConfig::default()
    }
}

fn channel_pair(config: ChannelConfig) -> (TelemetryChannel, FrameSender, ManualClock) {
    let clock = ManualClock::new(start());
    let (sender, transport) = ChannelTransport::create("test");
    let channel = TelemetryChannel::builder()
        .config(config)
        .clock(clock.clone())
        .transport(transport)
        .build()
        .unwrap();
    (channel, sender, clock)
}

/// Wait until a published snapshot satisfies `pred`.
async fn wait_for(channel: &TelemetryChannel, pred: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
    let mut rx = channel.watch();
    timeout(Duration::from_secs(60), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("publisher stopped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

fn heartbeat(agent: &str, cpu: u32) -> String {
    format!(r#"{{"agentId":"{}","kind":"heartbeat","payload":{{"cpu":{}}}}}"#, agent, cpu)
}

#[tokio::test]
async fn heartbeat_round_trip() {
    let (channel, sender, _) = channel_pair(fast_config());
    channel.enable();
    sender.send(heartbeat("A1", 42));

    let snapshot = wait_for(&channel, |s| s.is_agent_online("A1")).await;
    let agent = snapshot.agent("A1").unwrap();
    assert_eq!(agent.metric("cpu"), Some(42.0));
    assert_eq!(snapshot.connection, ConnectionState::Connected);

    assert!(channel.is_agent_connected("A1"));
    assert_eq!(channel.get_agent_status("A1").unwrap().metric("cpu"), Some(42.0));
}

#[tokio::test]
async fn unknown_kind_becomes_single_warning() {
    let (channel, sender, _) = channel_pair(fast_config());
    channel.enable();
    sender.send(r#"{"agentId":"A2","kind":"bogus","payload":{}}"#);

    let snapshot = wait_for(&channel, |s| !s.logs.is_empty()).await;
    assert_eq!(snapshot.logs.len(), 1);
    assert_eq!(snapshot.logs[0].agent_id, "A2");
    assert_eq!(snapshot.logs[0].level, LogLevel::Warning);
    assert!(snapshot.agent("A2").is_some());
    assert_eq!(snapshot.stats.unknown_frames, 1);
}

#[tokio::test]
async fn agents_expire_after_liveness_window() {
    let (channel, sender, clock) = channel_pair(fast_config());
    channel.enable();
    for agent in ["A1", "A2", "A3"] {
        sender.send(heartbeat(agent, 1));
    }
    wait_for(&channel, |s| s.online_count() == 3).await;

    clock.advance(Duration::from_secs(60));
    assert_eq!(channel.current().online_count(), 3);

    clock.advance(Duration::from_secs(1));
    let snapshot = channel.current();
    assert_eq!(snapshot.online_count(), 0);
    assert_eq!(snapshot.agents.len(), 3);
}

#[tokio::test]
async fn expiry_is_published_without_new_frames() {
    let (channel, sender, clock) = channel_pair(fast_config());
    channel.enable();
    sender.send(heartbeat("A1", 1));
    wait_for(&channel, |s| s.is_agent_online("A1")).await;

    clock.advance(Duration::from_secs(61));
    let snapshot = wait_for(&channel, |s| !s.is_agent_online("A1")).await;
    assert!(snapshot.agent("A1").is_some());
}

#[tokio::test]
async fn disconnect_takes_every_agent_offline_but_keeps_metrics() {
    let config = ChannelConfig {
        backoff_base_ms: 60_000,
        backoff_cap_ms: 60_000,
        ..fast_config()
    };
    let (channel, sender, _) = channel_pair(config);
    channel.enable();
    sender.send(heartbeat("A1", 42));
    sender.send(heartbeat("A2", 7));
    wait_for(&channel, |s| s.online_count() == 2).await;

    sender.drop_connection();
    let snapshot = wait_for(&channel, |s| s.connection == ConnectionState::Reconnecting).await;
    assert_eq!(snapshot.online_count(), 0);
    assert_eq!(snapshot.agent("A1").unwrap().metric("cpu"), Some(42.0));
    assert_eq!(snapshot.stats.retry_delay_ms, Some(60_000));
    assert!(!channel.is_agent_connected("A1"));
}

#[tokio::test]
async fn reconnects_after_connection_loss() {
    let (channel, sender, _) = channel_pair(fast_config());
    channel.enable();
    sender.send(heartbeat("A1", 1));
    wait_for(&channel, |s| s.is_agent_online("A1")).await;

    sender.drop_connection();
    sender.send(heartbeat("A1", 2));
    let snapshot = wait_for(&channel, |s| s.agent("A1").and_then(|a| a.metric("cpu")) == Some(2.0)).await;
    assert!(snapshot.is_agent_online("A1"));
    assert!(snapshot.stats.reconnect_attempts >= 1);
}

#[tokio::test]
async fn clear_logs_empties_history() {
    let (channel, sender, _) = channel_pair(fast_config());
    channel.enable();
    sender.send(r#"{"agentId":"A1","kind":"log","payload":"one"}"#);
    sender.send(r#"{"agentId":"A1","kind":"log","payload":"two"}"#);
    wait_for(&channel, |s| s.logs.len() == 2).await;

    channel.clear_logs();
    assert!(channel.current().logs.is_empty());

    sender.send(r#"{"agentId":"A1","kind":"log","payload":"three"}"#);
    let snapshot = wait_for(&channel, |s| s.logs.len() == 1).await;
    assert_eq!(snapshot.logs[0].message, "three");
    assert_eq!(snapshot.logs[0].seq, 3);
}

#[tokio::test]
async fn log_history_is_bounded() {
    let config = ChannelConfig {
        log_capacity: 3,
        ..fast_config()
    };
    let (channel, sender, _) = channel_pair(config);
    channel.enable();
    for i in 0..5 {
        sender.send(format!(r#"{{"agentId":"A1","kind":"log","payload":"m{}"}}"#, i));
    }

    let snapshot = wait_for(&channel, |s| s.stats.frames_received == 5).await;
    let messages: Vec<&str> = snapshot.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["m2", "m3", "m4"]);
    assert_eq!(snapshot.stats.evicted_logs, 2);
}

#[tokio::test]
async fn rejection_is_terminal() {
    let (transport, probe) = ScriptedTransport::new(vec![Step::Reject]);
    let channel = TelemetryChannel::builder()
        .config(fast_config())
        .transport(transport)
        .build()
        .unwrap();
    channel.enable();

    wait_for(&channel, |s| s.connection == ConnectionState::Failed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(channel.connection_state(), ConnectionState::Failed);

    // Manual enable starts over
    channel.enable();
    wait_for(&channel, |s| s.stats.reconnect_attempts >= 1).await;
    assert!(probe.attempts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_up_to_cap() {
    let (transport, probe) = ScriptedTransport::new(vec![]);
    let config = ChannelConfig {
        backoff_jitter: 0.0,
        ..ChannelConfig::default()
    };
    let channel = TelemetryChannel::builder().config(config).transport(transport).build().unwrap();
    channel.enable();

    let mut rx = channel.watch();
    let mut delays: Vec<u64> = Vec::new();
    while delays.len() < 6 {
        rx.changed().await.unwrap();
        let delay = rx.borrow_and_update().stats.retry_delay_ms;
        if let Some(delay) = delay {
            if delays.last() != Some(&delay) {
                delays.push(delay);
            }
        }
    }

    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    assert!(probe.attempts.load(Ordering::SeqCst) >= 6);
}

#[tokio::test(start_paused = true)]
async fn backoff_resets_only_after_data_arrives() {
    let steps = vec![
        Step::Brief(vec![]),
        Step::Brief(vec![]),
        Step::Brief(vec![r#"{"agentId":"A1","kind":"heartbeat"}"#]),
        Step::Brief(vec![]),
    ];
    let (transport, _) = ScriptedTransport::new(steps);
    let config = ChannelConfig {
        backoff_jitter: 0.0,
        ..ChannelConfig::default()
    };
    let channel = TelemetryChannel::builder().config(config).transport(transport).build().unwrap();
    channel.enable();

    // One delay per scheduled reconnect
    let mut rx = channel.watch();
    let mut delays: Vec<u64> = Vec::new();
    let mut seen_attempts = 0;
    while delays.len() < 4 {
        rx.changed().await.unwrap();
        let stats = rx.borrow_and_update().stats;
        if stats.reconnect_attempts > seen_attempts {
            seen_attempts = stats.reconnect_attempts;
            delays.extend(stats.retry_delay_ms);
        }
    }

    // Empty connections keep backing off; the one that delivered a frame resets it
    assert_eq!(delays, vec![1_000, 2_000, 1_000, 2_000]);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_ends_in_failed() {
    let (transport, probe) = ScriptedTransport::new(vec![]);
    let config = ChannelConfig {
        max_reconnect_attempts: Some(2),
        ..fast_config()
    };
    let channel = TelemetryChannel::builder().config(config).transport(transport).build().unwrap();
    channel.enable();

    let snapshot = wait_for(&channel, |s| s.connection == ConnectionState::Failed).await;
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(snapshot.stats.reconnect_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_disabled_fails_on_first_loss() {
    let (transport, probe) = ScriptedTransport::new(vec![Step::Refuse]);
    let config = ChannelConfig {
        reconnect_enabled: false,
        ..fast_config()
    };
    let channel = TelemetryChannel::builder().config(config).transport(transport).build().unwrap();
    channel.enable();

    wait_for(&channel, |s| s.connection == ConnectionState::Failed).await;
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn enable_is_idempotent() {
    let (transport, probe) = ScriptedTransport::new(vec![Step::Open(vec![])]);
    let channel = TelemetryChannel::builder()
        .config(fast_config())
        .transport(transport)
        .build()
        .unwrap();

    channel.enable();
    channel.enable();
    wait_for(&channel, |s| s.connection == ConnectionState::Connected).await;
    channel.enable();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(probe.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(probe.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rapid_toggling_never_overlaps_attempts() {
    let steps = (0..50).map(|_| Step::Slow(Duration::from_millis(30))).collect();
    let (transport, probe) = ScriptedTransport::new(steps);
    let channel = TelemetryChannel::builder()
        .config(fast_config())
        .transport(transport)
        .build()
        .unwrap();

    for i in 0..20 {
        channel.enable();
        tokio::time::sleep(Duration::from_millis(5 + i % 7)).await;
        channel.disable();
        channel.enable();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    channel.disable();

    let attempts = probe.attempts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(probe.max_live.load(Ordering::SeqCst) <= 1);
    assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    // Nothing revives the connection after disable
    assert_eq!(probe.attempts.load(Ordering::SeqCst), attempts);
    assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
    assert!(channel.is_manually_disabled());
}

#[tokio::test(start_paused = true)]
async fn toggle_flips_between_disconnected_and_connected() {
    let (transport, _) = ScriptedTransport::new(vec![Step::Open(vec![]), Step::Open(vec![])]);
    let channel = TelemetryChannel::builder()
        .config(fast_config())
        .transport(transport)
        .build()
        .unwrap();

    channel.toggle();
    wait_for(&channel, |s| s.connection == ConnectionState::Connected).await;

    channel.toggle();
    assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
    assert!(channel.is_manually_disabled());

    channel.toggle();
    wait_for(&channel, |s| s.connection == ConnectionState::Connected).await;
    assert!(!channel.is_manually_disabled());
}

#[tokio::test(start_paused = true)]
async fn frames_from_one_connection_apply_in_order() {
    let frames = vec![
        r#"{"agentId":"A1","kind":"status","payload":"idle"}"#,
        r#"{"agentId":"A1","kind":"status","payload":"busy"}"#,
        r#"{"agentId":"A1","kind":"status","payload":"done"}"#,
    ];
    let (transport, _) = ScriptedTransport::new(vec![Step::Open(frames)]);
    let channel = TelemetryChannel::builder()
        .config(fast_config())
        .transport(transport)
        .build()
        .unwrap();
    channel.enable();

    let snapshot = wait_for(&channel, |s| s.agent("A1").is_some_and(|a| a.event_count == 3)).await;
    let status = snapshot.agent("A1").unwrap().reported_status.clone().unwrap();
    assert_eq!(status.status, "done");
}

#[tokio::test]
async fn subscribers_receive_updates_until_dropped() {
    let (channel, sender, _) = channel_pair(fast_config());
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = channel.subscribe(move |snapshot| {
        let _ = seen_tx.send(snapshot.online_count());
    });

    // Current snapshot first
    assert_eq!(seen_rx.recv().await, Some(0));

    channel.enable();
    sender.send(heartbeat("A1", 1));
    let online = timeout(Duration::from_secs(5), async {
        loop {
            if seen_rx.recv().await == Some(1) {
                return 1;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(online, 1);

    drop(subscription);
    sender.send(heartbeat("A2", 1));
    wait_for(&channel, |s| s.online_count() == 2).await;
    // The sender half lived inside the callback, so the channel closes once
    // the subscription is gone
    while let Ok(Some(_)) = timeout(Duration::from_millis(50), seen_rx.recv()).await {}
    assert!(seen_rx.recv().await.is_none());
}
