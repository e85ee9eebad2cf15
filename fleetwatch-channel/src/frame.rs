//! Inbound frame decoding.
//!
//! Frames arrive as JSON objects:
//!
//! ```json
//! {"agentId": "A1", "kind": "heartbeat", "payload": {"cpu": 42}, "timestamp": "2024-05-01T12:00:00Z"}
//! ```
//!
//! Decoding turns them into a [`Frame`] carrying a typed [`Event`]. Kinds the
//! channel does not know become [`Event::Unknown`] so they can still be logged.

use chrono::{DateTime, TimeZone, Utc};
use fleetwatch_types::{LogLevel, Metrics};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FrameError;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub agent_id: String,
    /// Sender-side timestamp. `None` when the frame did not carry one.
    pub timestamp: Option<DateTime<Utc>>,
    pub event: Event,
}

/// Typed event payloads, one variant per known kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Liveness signal, optionally with a fresh metrics snapshot.
    Heartbeat { metrics: Option<Metrics> },
    /// A log line to keep in the ring buffer.
    Log {
        level: LogLevel,
        event_type: Option<String>,
        message: String,
    },
    /// An agent reporting its own status.
    Status {
        status: String,
        message: Option<String>,
    },
    /// Any other kind, with the payload kept as text.
    Unknown { kind: String, raw: String },
}

impl Event {
    /// The wire name of this event's kind.
    pub fn kind(&self) -> &str {
        match self {
            Event::Heartbeat { .. } => "heartbeat",
            Event::Log { .. } => "log",
            Event::Status { .. } => "status",
            Event::Unknown { kind, .. } => kind,
        }
    }
}

/// A frame that failed to decode, with whatever agent identifier could be salvaged.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub agent_id: Option<String>,
    pub error: FrameError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(alias = "agent_id")]
    agent_id: String,
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Decode one frame from its JSON text.
pub fn decode(text: &str) -> Result<Frame, DecodeFailure> {
    let value: Value = serde_json::from_str(text.trim()).map_err(|e| DecodeFailure {
        agent_id: None,
        error: FrameError::Json(e.to_string()),
    })?;
    decode_value(value)
}

/// Decode one frame from an already parsed JSON value.
pub fn decode_value(value: Value) -> Result<Frame, DecodeFailure> {
    let Value::Object(object) = value else {
        return Err(DecodeFailure {
            agent_id: None,
            error: FrameError::Json("frame is not a JSON object".to_string()),
        });
    };

    let salvaged = object
        .get("agentId")
        .or_else(|| object.get("agent_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let fail = |error: FrameError| DecodeFailure {
        agent_id: salvaged.clone(),
        error,
    };

    if !object.get("kind").is_some_and(Value::is_string) {
        return Err(fail(FrameError::MissingField("kind")));
    }
    if salvaged.is_none() {
        return Err(fail(FrameError::MissingField("agentId")));
    }

    let raw: RawFrame =
        serde_json::from_value(Value::Object(object)).map_err(|e| fail(FrameError::Json(e.to_string())))?;

    let timestamp = match raw.timestamp {
        None | Some(Value::Null) => None,
        Some(ts) => Some(parse_timestamp(&ts).map_err(fail)?),
    };
    let event = parse_event(raw.kind, raw.payload).map_err(fail)?;

    Ok(Frame {
        agent_id: raw.agent_id,
        timestamp,
        event,
    })
}

/// ISO-8601 strings, or integer epoch milliseconds.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, FrameError> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| FrameError::InvalidTimestamp(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| FrameError::InvalidTimestamp(n.to_string())),
        other => Err(FrameError::InvalidTimestamp(other.to_string())),
    }
}

fn parse_event(kind: String, payload: Value) -> Result<Event, FrameError> {
    match kind.as_str() {
        "heartbeat" => parse_heartbeat(payload),
        "log" => parse_log(payload),
        "status" => parse_status(payload),
        _ => Ok(Event::Unknown {
            raw: stringify(&payload),
            kind,
        }),
    }
}

fn parse_heartbeat(payload: Value) -> Result<Event, FrameError> {
    let object = match payload {
        Value::Null => return Ok(Event::Heartbeat { metrics: None }),
        Value::Object(object) => object,
        other => {
            return Err(FrameError::InvalidPayload {
                kind: "heartbeat",
                reason: format!("expected an object, got {}", type_name(&other)),
            })
        }
    };

    // Either {"metrics": {...}} or the metrics inline at the top level
    let source = match object.get("metrics") {
        Some(Value::Object(nested)) => nested,
        _ => &object,
    };
    let metrics: Metrics = source
        .iter()
        .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
        .collect();

    Ok(Event::Heartbeat {
        metrics: (!metrics.is_empty()).then_some(metrics),
    })
}

fn parse_log(payload: Value) -> Result<Event, FrameError> {
    let object = match payload {
        Value::String(message) => {
            return Ok(Event::Log {
                level: LogLevel::Info,
                event_type: None,
                message,
            })
        }
        Value::Object(object) => object,
        other => {
            return Err(FrameError::InvalidPayload {
                kind: "log",
                reason: format!("expected an object, got {}", type_name(&other)),
            })
        }
    };

    let message = string_field(&object, &["message", "msg"]).ok_or_else(|| FrameError::InvalidPayload {
        kind: "log",
        reason: "missing `message`".to_string(),
    })?;
    let level = match string_field(&object, &["level"]) {
        None => LogLevel::Info,
        Some(name) => LogLevel::parse(&name).ok_or_else(|| FrameError::InvalidPayload {
            kind: "log",
            reason: format!("unknown level `{}`", name),
        })?,
    };

    Ok(Event::Log {
        level,
        event_type: string_field(&object, &["eventType", "event_type"]),
        message,
    })
}

fn parse_status(payload: Value) -> Result<Event, FrameError> {
    match payload {
        Value::String(status) => Ok(Event::Status {
            status,
            message: None,
        }),
        Value::Object(object) => {
            let status = string_field(&object, &["status"]).ok_or_else(|| FrameError::InvalidPayload {
                kind: "status",
                reason: "missing `status`".to_string(),
            })?;
            Ok(Event::Status {
                status,
                message: string_field(&object, &["message"]),
            })
        }
        other => Err(FrameError::InvalidPayload {
            kind: "status",
            reason: format!("expected an object, got {}", type_name(&other)),
        }),
    }
}

fn string_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| object.get(*name).and_then(Value::as_str))
        .map(str::to_string)
}

/// Raw payload as text: strings verbatim, everything else as compact JSON.
fn stringify(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
