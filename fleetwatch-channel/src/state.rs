//! Shared channel state: agent table, log buffer, connection link and counters.
//!
//! Writers (the multiplexer, the supervisor, `clear_logs`) wrap each logical
//! change in [`ChannelState::write`]. Writers share the gate with each other,
//! while a snapshot holds it exclusively for the duration of the copy, so a
//! snapshot never observes half of a change and always includes every change
//! that completed before it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetwatch_types::{ChannelStats, ConnectionState, SchemaVersion, Snapshot};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::Notify;
use tracing::info;

use crate::clock::Clock;
use crate::config::ChannelConfig;
use crate::log_buffer::LogBuffer;
use crate::table::AgentTable;

/// Gate between writers and snapshot readers.
///
/// Writers take the shared side, so writes to different agents still run in
/// parallel. A snapshot takes the exclusive side. The lock is fair: a waiting
/// snapshot stops new writers from entering, so it gets in after the writes
/// already in progress finish.
#[derive(Debug, Default)]
struct WriteGate {
    lock: RwLock<()>,
    generation: AtomicU64,
}

struct WriteGuard<'a> {
    gate: &'a WriteGate,
    _shared: RwLockReadGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // Bumped while the shared side is still held
        self.gate.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl WriteGate {
    fn begin(&self) -> WriteGuard<'_> {
        WriteGuard {
            gate: self,
            _shared: self.lock.read(),
        }
    }

    /// Run `f` with every writer excluded. Returns the value and the
    /// generation it reflects.
    fn read<T>(&self, f: impl FnOnce() -> T) -> (T, u64) {
        let _exclusive = self.lock.write();
        let value = f();
        (value, self.generation.load(Ordering::SeqCst))
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Connection state tagged with the supervisor generation that owns it.
#[derive(Debug, Clone, Copy)]
struct Link {
    epoch: u64,
    state: ConnectionState,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub unknown_frames: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    retry_delay_ms: Mutex<Option<u64>>,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a snapshot is made of.
#[derive(Debug)]
pub struct ChannelState {
    pub(crate) table: AgentTable,
    pub(crate) logs: LogBuffer,
    pub(crate) counters: Counters,
    link: Mutex<Link>,
    gate: WriteGate,
    clock: Arc<dyn Clock>,
    changed: Notify,
}

impl ChannelState {
    pub fn new(config: &ChannelConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: AgentTable::new(config.liveness_window()),
            logs: LogBuffer::new(config.log_capacity),
            counters: Counters::default(),
            link: Mutex::new(Link {
                epoch: 0,
                state: ConnectionState::Disconnected,
            }),
            gate: WriteGate::default(),
            clock,
            changed: Notify::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply one logical change. Snapshots see all of it or none of it, and
    /// subscribers are told something changed.
    ///
    /// `f` must not call `write` or `snapshot` itself.
    pub fn write<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let result = {
            let _guard = self.gate.begin();
            f(self)
        };
        self.changed.notify_one();
        result
    }

    /// Resolves once a write has happened since the last call.
    pub(crate) async fn changed(&self) {
        self.changed.notified().await
    }

    pub fn connection(&self) -> ConnectionState {
        self.link.lock().state
    }

    /// Move to `to` on behalf of supervisor generation `epoch`.
    ///
    /// Returns `false` if that generation has been superseded (disabled or
    /// restarted); the caller must stop.
    pub(crate) fn transition(&self, epoch: u64, to: ConnectionState) -> bool {
        {
            let link = self.link.lock();
            if link.epoch != epoch {
                return false;
            }
            if link.state == to {
                return true;
            }
        }
        self.write(|s| {
            let mut link = s.link.lock();
            if link.epoch != epoch {
                return false;
            }
            let from = link.state;
            link.state = to;
            if to != ConnectionState::Reconnecting {
                *s.counters.retry_delay_ms.lock() = None;
            }
            info!(from = %from, to = %to, "connection state changed");
            true
        })
    }

    /// Start a new supervisor generation in state `to`, invalidating the old one.
    pub(crate) fn reset(&self, to: ConnectionState) -> u64 {
        self.write(|s| {
            let mut link = s.link.lock();
            let from = link.state;
            link.epoch += 1;
            link.state = to;
            *s.counters.retry_delay_ms.lock() = None;
            if from != to {
                info!(from = %from, to = %to, "connection state changed");
            }
            link.epoch
        })
    }

    /// Enter `Reconnecting` on behalf of `epoch` with a retry due after
    /// `delay_ms`. The attempt counter, the delay and the state change land
    /// in one write. Returns `false` if the generation has been superseded.
    pub(crate) fn schedule_retry(&self, epoch: u64, delay_ms: u64) -> bool {
        self.write(|s| {
            let mut link = s.link.lock();
            if link.epoch != epoch {
                return false;
            }
            Counters::bump(&s.counters.reconnect_attempts);
            *s.counters.retry_delay_ms.lock() = Some(delay_ms);
            let from = link.state;
            link.state = ConnectionState::Reconnecting;
            if from != ConnectionState::Reconnecting {
                info!(from = %from, to = %link.state, "connection state changed");
            }
            true
        })
    }

    /// Bump the version so subscribers re-read derived state (liveness).
    pub(crate) fn touch(&self) {
        self.write(|_| ());
    }

    pub fn version(&self) -> u64 {
        self.gate.generation()
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.counters.malformed_frames.load(Ordering::Relaxed),
            unknown_frames: self.counters.unknown_frames.load(Ordering::Relaxed),
            reconnect_attempts: self.counters.reconnect_attempts.load(Ordering::Relaxed),
            evicted_logs: self.logs.evicted(),
            retry_delay_ms: *self.counters.retry_delay_ms.lock(),
        }
    }

    /// A consistent point-in-time snapshot, with liveness evaluated now.
    ///
    /// Reflects every write that returned before this call.
    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now();
        let ((connection, agents, logs, stats), version) = self.gate.read(|| {
            let connection = self.connection();
            (
                connection,
                self.table.views(now, connection.is_connected()),
                self.logs.snapshot(),
                self.stats(),
            )
        });

        Snapshot {
            schema: SchemaVersion::current(),
            version,
            taken_at: now,
            connection,
            agents,
            logs,
            stats,
        }
    }

    /// Identifiers of the agents online right now.
    pub fn online_ids(&self) -> Vec<String> {
        let connected = self.connection().is_connected();
        self.table.online_ids(self.clock.now(), connected)
    }
}
