//! Snapshot publication: coalesced pushes to subscribers plus a periodic
//! liveness tick.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use fleetwatch_types::Snapshot;
use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::state::ChannelState;

/// Publish a fresh snapshot after each burst of writes.
///
/// Writes arriving within `window` of the first one are folded into the same
/// publication. A write that lands after the snapshot is taken triggers the
/// next round, so nothing is left unpublished.
pub(crate) async fn run_coalescer(
    state: Arc<ChannelState>,
    tx: watch::Sender<Arc<Snapshot>>,
    window: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = state.changed() => {}
            _ = stop_rx.changed() => break,
        }
        if !window.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = stop_rx.changed() => break,
            }
        }

        let snapshot = Arc::new(state.snapshot());
        trace!(version = snapshot.version, "publishing snapshot");
        tx.send_replace(snapshot);
    }
}

/// Re-evaluate liveness every `interval` and force a publication when the
/// set of online agents changed, so expiry is noticed without new frames.
pub(crate) async fn run_ticker(state: Arc<ChannelState>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut online = state.online_ids();

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let now_online = state.online_ids();
                if now_online != online {
                    trace!(online = now_online.len(), "online set changed");
                    online = now_online;
                    state.touch();
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// A push subscription created by `TelemetryChannel::subscribe`.
///
/// The callback stops being invoked once [`Subscription::unsubscribe`]
/// returns or the subscription is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    active: Arc<ReentrantMutex<Cell<bool>>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F>(runtime: &Handle, mut rx: watch::Receiver<Arc<Snapshot>>, callback: F) -> Self
    where
        F: Fn(Arc<Snapshot>) + Send + 'static,
    {
        let active = Arc::new(ReentrantMutex::new(Cell::new(true)));
        let flag = active.clone();

        // Deliver the current snapshot first
        rx.mark_changed();
        let task = runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                let guard = flag.lock();
                if !guard.get() {
                    break;
                }
                callback(snapshot);
            }
        });

        Self { active, task }
    }

    /// Stop delivery. Waits for an in-progress callback on another thread to
    /// finish; calling it from within the callback itself is fine.
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Whether the subscription still receives snapshots.
    pub fn is_active(&self) -> bool {
        self.active.lock().get() && !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.lock().set(false);
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.active.lock().get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChannelConfig;
    use chrono::{DateTime, Utc};
    use fleetwatch_types::{ConnectionState, LogLevel, LogRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> (Arc<ChannelState>, ManualClock) {
        let clock = ManualClock::new(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap());
        let state = Arc::new(ChannelState::new(&ChannelConfig::default(), Arc::new(clock.clone())));
        (state, clock)
    }

    fn append(state: &ChannelState, message: &str) {
        state.write(|s| s.logs.append(LogRecord::new("A1", s.now(), LogLevel::Info, message)));
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_coalesced() {
        let (state, _) = state();
        let (tx, mut rx) = watch::channel(Arc::new(Snapshot::default()));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_coalescer(state.clone(), tx, Duration::from_millis(100), stop_rx));

        for i in 0..10 {
            append(&state, &format!("m{}", i));
        }
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.logs.len(), 10);

        // A late write is published in the next round
        append(&state, "late");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().logs.len(), 11);

        stop_tx.send(true).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_expiry() {
        let (state, clock) = state();
        let epoch = state.reset(ConnectionState::Connecting);
        state.transition(epoch, ConnectionState::Connected);
        state.write(|s| s.table.upsert("A1", s.now(), |r| r.record_heartbeat(s.now(), None)));

        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_ticker(state.clone(), Duration::from_secs(5), stop_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = state.version();
        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(state.version() > before);
        assert!(!state.snapshot().is_agent_online("A1"));
    }

    #[tokio::test]
    async fn subscription_gets_current_then_stops_after_drop() {
        let (tx, rx) = watch::channel(Arc::new(Snapshot::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

        let sub = Subscription::spawn(&Handle::current(), rx, move |snapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = seen_tx.send(snapshot.version);
        });

        assert_eq!(seen_rx.recv().await, Some(0));
        tx.send_replace(Arc::new(Snapshot {
            version: 7,
            ..Snapshot::default()
        }));
        assert_eq!(seen_rx.recv().await, Some(7));
        assert!(sub.is_active());

        sub.unsubscribe();
        let after = calls.load(Ordering::SeqCst);
        tx.send_replace(Arc::new(Snapshot {
            version: 8,
            ..Snapshot::default()
        }));
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), after);
    }
}
