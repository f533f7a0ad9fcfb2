//! Wire constants

/// GUID appended to `Sec-WebSocket-Key` before hashing (RFC 6455 section 1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// FIN bit of the first frame header byte
pub const FIN_BIT: u8 = 0x80;

/// MASK bit of the second frame header byte
pub const MASK_BIT: u8 = 0x80;

/// Largest payload length encoded in the 7-bit field
pub const MAX_SHORT_LEN: usize = 125;

/// 7-bit length marker for a 16-bit extended length
pub const LEN_16: u8 = 126;

/// 7-bit length marker for a 64-bit extended length
pub const LEN_64: u8 = 127;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// Default cap on an inbound frame payload (1 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Default cap on an HTTP request head (16 KiB)
pub const DEFAULT_MAX_HEAD: usize = 16 * 1024;

/// Default cap on an HTTP request body (1 MiB)
pub const DEFAULT_MAX_BODY: usize = 1024 * 1024;

/// Engine.IO ping interval advertised in the open packet
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;

/// Engine.IO ping timeout advertised in the open packet
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 5_000;

/// Length of a generated Engine.IO session id
pub const SID_LEN: usize = 20;
