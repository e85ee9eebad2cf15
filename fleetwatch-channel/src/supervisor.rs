//! Connection supervisor: connect, read, and reconnect with backoff.
//!
//! One supervisor task runs per enabled period. The task is tagged with an
//! epoch; once `disable` (or a fresh `enable`) starts a new epoch, every state
//! write from the old task is ignored, so late callbacks cannot revive it.

use std::sync::Arc;
use std::time::Duration;

use fleetwatch_types::ConnectionState;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::multiplexer::EventMultiplexer;
use crate::state::ChannelState;
use crate::transport::{Connection, Transport};

/// What to do after a connection attempt failed or a connection was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then attempt again. `attempt` is zero-based.
    Retry { attempt: u32, delay: Duration },
    /// The retry budget is spent.
    GiveUp,
}

/// Pure reconnect bookkeeping: consecutive failures and the budget.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    backoff: Backoff,
    budget: Option<u32>,
    failures: u32,
}

impl RetryTracker {
    pub fn new(backoff: Backoff, budget: Option<u32>) -> Self {
        Self {
            backoff,
            budget,
            failures: 0,
        }
    }

    /// Record a failure and decide on the next step. The returned delay is
    /// before jitter.
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.budget.is_some_and(|budget| self.failures >= budget) {
            return RetryDecision::GiveUp;
        }
        let attempt = self.failures;
        self.failures = self.failures.saturating_add(1);
        RetryDecision::Retry {
            attempt,
            delay: self.backoff.delay(attempt),
        }
    }

    /// A connection delivered data; the next failure starts from the base delay.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Why a connection ended.
enum Ended {
    Lost(TransportError),
    Rejected(String),
}

/// A supervisor generation. Consumed by [`Supervisor::run`].
pub(crate) struct Supervisor {
    state: Arc<ChannelState>,
    transport: Arc<dyn Transport>,
    mux: EventMultiplexer,
    config: ChannelConfig,
    epoch: u64,
    /// Shared across generations: at most one connection attempt or
    /// connection exists at any time.
    slot: Arc<Semaphore>,
}

impl Supervisor {
    pub(crate) fn new(
        state: Arc<ChannelState>,
        transport: Arc<dyn Transport>,
        config: ChannelConfig,
        epoch: u64,
        slot: Arc<Semaphore>,
    ) -> Self {
        let mux = EventMultiplexer::new(state.clone());
        Self {
            state,
            transport,
            mux,
            config,
            epoch,
            slot,
        }
    }

    fn enter(&self, to: ConnectionState) -> bool {
        self.state.transition(self.epoch, to)
    }

    pub(crate) async fn run(self) {
        let endpoint = self.transport.description().to_string();
        let backoff = self.config.backoff();
        let mut retries = RetryTracker::new(backoff, self.config.retry_budget());

        loop {
            if !self.enter(ConnectionState::Connecting) {
                return;
            }

            let Ok(permit) = self.slot.clone().acquire_owned().await else {
                return;
            };
            // The generation may have been superseded while waiting for the slot
            if !self.enter(ConnectionState::Connecting) {
                return;
            }

            debug!(endpoint = %endpoint, "connecting");
            let attempt = match tokio::time::timeout(self.config.connect_timeout(), self.transport.connect()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let ended = match attempt {
                Ok(mut connection) => {
                    if !self.enter(ConnectionState::Connected) {
                        connection.close().await;
                        return;
                    }
                    info!(endpoint = %endpoint, "connected");
                    let ended = self.pump(connection.as_mut(), &mut retries).await;
                    connection.close().await;
                    ended
                }
                Err(TransportError::Rejected(reason)) => Ended::Rejected(reason),
                Err(e) => Ended::Lost(e),
            };
            drop(permit);

            match ended {
                Ended::Rejected(reason) => {
                    error!(endpoint = %endpoint, reason = %reason, "endpoint rejected the client, giving up");
                    self.enter(ConnectionState::Failed);
                    return;
                }
                Ended::Lost(e) => {
                    warn!(endpoint = %endpoint, error = %e, "connection lost");
                }
            }

            let (attempt, delay) = match retries.record_failure() {
                RetryDecision::Retry { attempt, .. } => (attempt, backoff.jittered(attempt)),
                RetryDecision::GiveUp => {
                    error!(
                        endpoint = %endpoint,
                        failures = retries.failures(),
                        "reconnect budget exhausted"
                    );
                    self.enter(ConnectionState::Failed);
                    return;
                }
            };

            if !self.state.schedule_retry(self.epoch, delay.as_millis() as u64) {
                return;
            }
            info!(
                endpoint = %endpoint,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Feed frames into the multiplexer until the connection ends.
    ///
    /// The backoff only starts over once the first frame arrives, so an
    /// endpoint that accepts and immediately hangs up keeps backing off.
    async fn pump(&self, connection: &mut dyn Connection, retries: &mut RetryTracker) -> Ended {
        let mut delivered = false;
        loop {
            match connection.next_frame().await {
                Ok(Some(text)) => {
                    if !delivered {
                        delivered = true;
                        retries.record_success();
                    }
                    self.mux.ingest_text(&text);
                }
                Ok(None) => return Ended::Lost(TransportError::Closed("peer closed the connection".to_string())),
                Err(TransportError::Rejected(reason)) => return Ended::Rejected(reason),
                Err(e) => return Ended::Lost(e),
            }
        }
    }
}
