//! Control-channel envelope codec
//!
//! Two dialects share the same event names and payloads:
//!
//! ```text
//! SocketIo                                 Json
//! --------                                 ----
//! 0{"sid":..,"pingInterval":..}  open      {"event":"connected","data":{..}}
//! 40                             connect
//! 2 / 3                          ping/pong
//! 42["start-preview",{"fps":4}]  event     {"event":"start-preview","data":{"fps":4}}
//! ```
//!
//! A server speaks exactly one dialect on its control listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::protocol::constants::SID_LEN;

/// Envelope dialect spoken on the control channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Engine.IO/Socket.IO-style packets
    #[default]
    SocketIo,
    /// Plain `{"event":..,"data":..}` JSON objects
    Json,
}

/// A decoded inbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO ping, answered with a pong carrying the same payload
    Ping(String),
    /// Engine.IO pong
    Pong,
    /// Socket.IO namespace connect
    Connect,
    /// Engine.IO close or Socket.IO disconnect
    Close,
    /// Named application event
    Event { name: String, data: Value },
    /// Understood but carries nothing to act on
    Noop,
}

/// Parameters advertised in the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    pub sid: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Dialect {
    /// Frames sent right after the WebSocket handshake
    pub fn greeting(&self, open: &OpenParams) -> Vec<String> {
        match self {
            Dialect::SocketIo => vec![
                format!(
                    "0{}",
                    json!({
                        "sid": open.sid,
                        "upgrades": [],
                        "pingInterval": open.ping_interval.as_millis() as u64,
                        "pingTimeout": open.ping_timeout.as_millis() as u64,
                    })
                ),
                "40".to_string(),
            ],
            Dialect::Json => vec![self.encode_event(
                "connected",
                &json!({
                    "sessionId": open.sid,
                    "message": "Connected to photobooth server",
                }),
            )],
        }
    }

    /// Encode an outbound event
    pub fn encode_event(&self, name: &str, data: &Value) -> String {
        match self {
            Dialect::SocketIo => format!("42{}", json!([name, data])),
            Dialect::Json => json!({ "event": name, "data": data }).to_string(),
        }
    }

    /// Reply to a ping, if this dialect has one
    pub fn encode_pong(&self, payload: &str) -> Option<String> {
        match self {
            Dialect::SocketIo => Some(format!("3{}", payload)),
            Dialect::Json => None,
        }
    }

    /// Decode one text frame
    pub fn decode(&self, text: &str) -> Result<Packet, ProtocolError> {
        match self {
            Dialect::SocketIo => decode_socket_io(text),
            Dialect::Json => decode_json(text),
        }
    }
}

fn decode_socket_io(text: &str) -> Result<Packet, ProtocolError> {
    let mut chars = text.chars();
    let Some(engine_type) = chars.next() else {
        return Err(ProtocolError::MalformedEnvelope("empty packet".into()));
    };
    let rest = chars.as_str();

    match engine_type {
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(rest.to_string())),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_io_message(rest),
        '5' | '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::MalformedEnvelope(format!(
            "unknown packet type '{}'",
            other
        ))),
    }
}

/// Socket.IO packet inside an Engine.IO message: `<type>[/nsp,][ackId][json]`
fn decode_socket_io_message(text: &str) -> Result<Packet, ProtocolError> {
    let mut chars = text.chars();
    let socket_type = chars.next();
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        rest = rest.split_once(',').map(|(_, r)| r).unwrap_or("");
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match socket_type {
        Some('0') => Ok(Packet::Connect),
        Some('1') => Ok(Packet::Close),
        Some('2') => {
            let args: Vec<Value> = serde_json::from_str(rest)
                .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
            let mut args = args.into_iter();

            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(ProtocolError::MalformedEnvelope(
                        "event name is not a string".into(),
                    ))
                }
            };
            let data = args.next().unwrap_or(Value::Null);
            Ok(Packet::Event { name, data })
        }
        Some(_) => Ok(Packet::Noop),
        None => Err(ProtocolError::MalformedEnvelope("empty message".into())),
    }
}

fn decode_json(text: &str) -> Result<Packet, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::MalformedEnvelope("not an object".into()));
    };

    match obj.remove("event") {
        Some(Value::String(name)) => Ok(Packet::Event {
            name,
            data: obj.remove("data").unwrap_or(Value::Null),
        }),
        _ => Err(ProtocolError::MalformedEnvelope("missing event name".into())),
    }
}

static SID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a 20-character hex session id
///
/// Not cryptographically secure; it only needs to be unique per process.
pub fn generate_sid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut seed = nanos ^ SID_COUNTER.fetch_add(1, Ordering::Relaxed).rotate_left(32);

    let mut sid = String::with_capacity(SID_LEN);
    while sid.len() < SID_LEN {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        for byte in (seed >> 32).to_le_bytes().iter().take(4) {
            sid.push_str(&format!("{:02x}", byte));
        }
    }
    sid.truncate(SID_LEN);
    sid
}
