//! Routes decoded frames to the agent table and the log buffer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetwatch_types::{LogLevel, LogRecord, ReportedStatus};
use tracing::{debug, warn};

use crate::frame::{self, DecodeFailure, Event, Frame};
use crate::state::{ChannelState, Counters};

/// Event type attached to logs synthesized for frames that failed to decode.
pub const MALFORMED_EVENT_TYPE: &str = "malformed_frame";

/// Where an ingested frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Heartbeat,
    Log,
    Status,
    Unknown,
    Malformed,
}

/// Single entry point for inbound frames.
///
/// Frames from one connection are handed over in arrival order. Each frame is
/// applied as one write, so a snapshot sees it whole or not at all.
#[derive(Debug, Clone)]
pub struct EventMultiplexer {
    state: Arc<ChannelState>,
}

impl EventMultiplexer {
    pub fn new(state: Arc<ChannelState>) -> Self {
        Self { state }
    }

    /// Decode and route one raw text frame.
    pub fn ingest_text(&self, text: &str) -> Routed {
        match frame::decode(text) {
            Ok(frame) => self.ingest(frame),
            Err(failure) => self.reject(failure),
        }
    }

    /// Route an already decoded frame.
    pub fn ingest(&self, frame: Frame) -> Routed {
        let received_at = self.state.now();
        let at = frame.timestamp.unwrap_or(received_at);
        let agent_id = frame.agent_id;

        self.state.write(|s| {
            Counters::bump(&s.counters.frames_received);
            match frame.event {
                Event::Heartbeat { metrics } => {
                    // An agent clock running ahead must not extend its own liveness
                    let seen_at = at.min(received_at);
                    s.table.upsert(&agent_id, received_at, |record| {
                        record.event_count += 1;
                        record.record_heartbeat(seen_at, metrics);
                    });
                    Routed::Heartbeat
                }
                Event::Log {
                    level,
                    event_type,
                    message,
                } => {
                    s.table.upsert(&agent_id, received_at, |record| record.event_count += 1);
                    s.logs.append(LogRecord {
                        seq: 0,
                        agent_id,
                        timestamp: at,
                        level,
                        event_type,
                        message,
                    });
                    Routed::Log
                }
                Event::Status { status, message } => {
                    s.table.upsert(&agent_id, received_at, |record| {
                        record.event_count += 1;
                        record.reported_status = Some(ReportedStatus {
                            status,
                            message,
                            reported_at: at,
                        });
                    });
                    Routed::Status
                }
                Event::Unknown { kind, raw } => {
                    debug!(agent_id = %agent_id, kind = %kind, "unknown event kind");
                    Counters::bump(&s.counters.unknown_frames);
                    s.table.upsert(&agent_id, received_at, |record| record.event_count += 1);
                    s.logs.append(
                        LogRecord::new(
                            agent_id,
                            at,
                            LogLevel::Warning,
                            format!("unknown event kind '{}': {}", kind, raw),
                        )
                        .with_event_type(kind),
                    );
                    Routed::Unknown
                }
            }
        })
    }

    fn reject(&self, failure: DecodeFailure) -> Routed {
        let received_at: DateTime<Utc> = self.state.now();
        let agent_id = failure.agent_id.unwrap_or_default();
        warn!(agent_id = %agent_id, error = %failure.error, "dropping malformed frame");

        self.state.write(|s| {
            Counters::bump(&s.counters.frames_received);
            Counters::bump(&s.counters.malformed_frames);
            s.logs.append(
                LogRecord::new(
                    agent_id,
                    received_at,
                    LogLevel::Error,
                    format!("malformed frame: {}", failure.error),
                )
                .with_event_type(MALFORMED_EVENT_TYPE),
            );
        });
        Routed::Malformed
    }
}
