//! WebSocket upgrade handshake
//!
//! ```text
//! Client                                        Server
//!   |                                             |
//!   |-- GET ... Upgrade: websocket -------------->|
//!   |   Sec-WebSocket-Key: <key>                  |
//!   |                                             |
//!   |<- 101 Switching Protocols ------------------|
//!   |   Sec-WebSocket-Accept:                     |
//!   |     base64(sha1(key + GUID))                |
//!   |                                             |
//!   |            [frames in both directions]      |
//! ```
//!
//! Reference: RFC 6455 section 4.2

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::protocol::constants::WS_GUID;
use crate::protocol::http::Request;

/// Compute `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the `101 Switching Protocols` reply for an upgrade request
pub fn upgrade_response(request: &Request) -> Result<Bytes, HandshakeError> {
    let key = request
        .header("sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    Ok(Bytes::from(response))
}
