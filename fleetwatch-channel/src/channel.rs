//! The consumer-facing telemetry channel.

use std::sync::Arc;
use std::time::Duration;

use fleetwatch_types::{AgentView, ConnectionState, Snapshot};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::publisher::{run_coalescer, run_ticker, Subscription};
use crate::state::ChannelState;
use crate::supervisor::Supervisor;
use crate::table::is_live;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct Control {
    manually_disabled: bool,
    worker: Option<JoinHandle<()>>,
}

/// A self-healing telemetry channel.
///
/// Owns one supervised connection to the telemetry endpoint, keeps a table of
/// agents and a bounded log history, and publishes consistent snapshots.
///
/// # Example
///
/// ```rust,no_run
/// use fleetwatch_channel::{TelemetryChannel, transport::WebSocketTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let channel = TelemetryChannel::builder()
///         .transport(WebSocketTransport::new("ws://localhost:8080/telemetry"))
///         .build()?;
///
///     let _subscription = channel.subscribe(|snapshot| {
///         println!("{} agents online", snapshot.online_count());
///     });
///     channel.enable();
///
///     tokio::signal::ctrl_c().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct TelemetryChannel {
    state: Arc<ChannelState>,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    runtime: Handle,
    control: Mutex<Control>,
    slot: Arc<Semaphore>,
    published: watch::Receiver<Arc<Snapshot>>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetryChannel {
    /// Create a builder for configuring the channel.
    pub fn builder() -> TelemetryChannelBuilder {
        TelemetryChannelBuilder::new()
    }

    /// Start connecting, clearing a previous `disable`.
    ///
    /// No-op while connecting, connected or waiting to reconnect. From
    /// `Failed` this starts over with a fresh retry budget.
    pub fn enable(&self) {
        let mut control = self.control.lock();
        control.manually_disabled = false;

        let running = control.worker.as_ref().is_some_and(|worker| !worker.is_finished());
        if running && self.state.connection().is_active() {
            return;
        }
        if let Some(worker) = control.worker.take() {
            worker.abort();
        }

        let epoch = self.state.reset(ConnectionState::Connecting);
        info!(endpoint = %self.transport.description(), "telemetry channel enabled");
        let supervisor = Supervisor::new(
            self.state.clone(),
            self.transport.clone(),
            self.config.clone(),
            epoch,
            self.slot.clone(),
        );
        control.worker = Some(self.runtime.spawn(supervisor.run()));
    }

    /// Close the connection, cancel any pending reconnect and stay
    /// disconnected until [`enable`](Self::enable) is called.
    pub fn disable(&self) {
        let mut control = self.control.lock();
        control.manually_disabled = true;
        if let Some(worker) = control.worker.take() {
            worker.abort();
        }
        self.state.reset(ConnectionState::Disconnected);
        info!(endpoint = %self.transport.description(), "telemetry channel disabled");
    }

    /// Disable if active, enable otherwise.
    pub fn toggle(&self) {
        if self.state.connection().is_active() {
            self.disable();
        } else {
            self.enable();
        }
    }

    /// Whether the user turned the channel off.
    pub fn is_manually_disabled(&self) -> bool {
        self.control.lock().manually_disabled
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection()
    }

    /// A consistent snapshot taken now.
    pub fn current(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Call `callback` with the current snapshot and then after every
    /// published change, until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + 'static,
    {
        Subscription::spawn(&self.runtime, self.published.clone(), callback)
    }

    /// Pull-style access to published snapshots.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.published.clone()
    }

    /// Empty the log history.
    pub fn clear_logs(&self) {
        self.state.write(|s| s.logs.clear());
    }

    /// Whether the agent is online right now.
    pub fn is_agent_connected(&self, agent_id: &str) -> bool {
        let connected = self.state.connection().is_connected();
        self.state.table.liveness(agent_id, self.state.now(), connected)
    }

    /// The agent's current view, if it has ever been seen.
    pub fn get_agent_status(&self, agent_id: &str) -> Option<AgentView> {
        let connected = self.state.connection().is_connected();
        let now = self.state.now();
        let record = self.state.table.get(agent_id)?;
        let online = is_live(record.last_heartbeat_at, now, self.state.table.liveness_window(), connected);
        Some(record.view(online))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

impl Drop for TelemetryChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.control.get_mut().worker.take() {
            worker.abort();
        }
        let _ = self.stop_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Builder for a [`TelemetryChannel`].
#[derive(Debug, Default)]
pub struct TelemetryChannelBuilder {
    config: ChannelConfig,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
}

impl TelemetryChannelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.config.liveness_window_ms = window.as_millis() as u64;
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.config.log_capacity = capacity;
        self
    }

    /// Use a custom clock for liveness. Defaults to the system clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the channel and start its background tasks. The channel starts
    /// disconnected; call [`TelemetryChannel::enable`] to connect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<TelemetryChannel, ChannelError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(ChannelError::MissingTransport)?;
        let runtime = Handle::try_current().map_err(|e| ChannelError::NoRuntime(e.to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let state = Arc::new(ChannelState::new(&self.config, clock));
        let (tx, published) = watch::channel(Arc::new(state.snapshot()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = vec![
            runtime.spawn(run_coalescer(
                state.clone(),
                tx,
                self.config.coalesce_window(),
                stop_rx.clone(),
            )),
            runtime.spawn(run_ticker(state.clone(), self.config.tick_interval(), stop_rx)),
        ];

        Ok(TelemetryChannel {
            state,
            transport,
            config: self.config,
            runtime,
            control: Mutex::new(Control::default()),
            slot: Arc::new(Semaphore::new(1)),
            published,
            stop_tx,
            tasks,
        })
    }
}
