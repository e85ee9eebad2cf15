//! # fleetwatch-types
//!
//! Core types for live agent telemetry. This crate defines the consumer-facing
//! view of a telemetry channel: the connection state, per-agent liveness
//! records, the bounded log history and the snapshot that ties them together.
//!
//! ## Design Goals
//!
//! - **Plain data**: every type here is an owned, immutable value. Consumers
//!   never see locks or channels.
//! - **Optional serialization**: enable the `serde` feature to export snapshots
//!   as JSON (field names follow the wire format, e.g. `agentId`).
//! - **Versioned schema**: snapshots include version info for forward compatibility.
//!
//! ## Example
//!
//! ```rust
//! use fleetwatch_types::{ConnectionState, LogLevel, Snapshot};
//!
//! let snapshot = Snapshot::default();
//! assert_eq!(snapshot.connection, ConnectionState::Disconnected);
//! assert_eq!(snapshot.online_count(), 0);
//! assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
//! ```

mod agent;
mod connection;
mod log;
mod snapshot;
mod version;

pub use agent::*;
pub use connection::*;
pub use log::*;
pub use snapshot::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const SCHEMA_VERSION: u32 = 1;
