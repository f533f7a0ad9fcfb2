//! Control-channel wire protocol
//!
//! This module provides:
//! - HTTP request parsing and response building
//! - WebSocket upgrade handshake and frame codec
//! - The event envelope in its two dialects
//! - Flattening of event payloads into dotted keys

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod payload;

pub use envelope::{Dialect, OpenParams, Packet};
pub use frame::{FrameReader, WsFrame};
pub use http::{Request, Response};
pub use payload::EventPayload;
