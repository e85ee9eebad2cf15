//! # fleetwatch-channel
//!
//! A self-healing telemetry channel for dashboards that watch a fleet of
//! remote agents.
//!
//! The channel keeps one connection to a telemetry endpoint alive, routes
//! inbound frames into an agent table and a bounded log history, derives
//! per-agent liveness from heartbeats, and publishes consistent snapshots to
//! any number of subscribers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetwatch_channel::TelemetryChannel;
//! use fleetwatch_channel::transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = TelemetryChannel::builder()
//!         .transport(transport::from_url("ws://localhost:8080/telemetry")?)
//!         .build()?;
//!     channel.enable();
//!
//!     let mut snapshots = channel.watch();
//!     while snapshots.changed().await.is_ok() {
//!         let snapshot = snapshots.borrow_and_update().clone();
//!         println!("{}: {} online", snapshot.connection, snapshot.online_count());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Frames
//!
//! Each inbound frame is a JSON object with `agentId`, `kind`, an optional
//! `payload` and an optional `timestamp`. Known kinds are `heartbeat`, `log`
//! and `status`; anything else is kept as a warning log entry. Frames that
//! cannot be decoded become error log entries and never touch agent state.
//!
//! ## Features
//!
//! - `websocket` (default): the `ws://` transport, built on tokio-tungstenite.

mod backoff;
mod channel;
mod clock;
mod config;
mod error;
mod log_buffer;
mod multiplexer;
mod publisher;
mod state;
mod supervisor;
mod table;

pub mod frame;
pub mod transport;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use channel::{TelemetryChannel, TelemetryChannelBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChannelConfig;
pub use error::{ChannelError, ConfigError, FrameError, TransportError};
pub use log_buffer::LogBuffer;
pub use multiplexer::{EventMultiplexer, Routed, MALFORMED_EVENT_TYPE};
pub use publisher::Subscription;
pub use state::ChannelState;
pub use supervisor::{RetryDecision, RetryTracker};
pub use table::{is_live, AgentRecord, AgentTable};

// Re-export types for convenience
pub use fleetwatch_types::{
    AgentView, ChannelStats, ConnectionState, LogLevel, LogRecord, Metrics, ReportedStatus, SchemaVersion, Snapshot,
};
