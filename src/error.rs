//! Error types
//!
//! Transport and protocol failures terminate a single connection. Stream,
//! capture and application failures are reported to the requesting client as
//! `success:false` replies carrying [`Error::code`].

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or pipe I/O failure
    Io(io::Error),
    /// WebSocket framing or envelope violation
    Protocol(ProtocolError),
    /// HTTP upgrade handshake failure
    Handshake(HandshakeError),
    /// Preview stream state violation
    Stream(StreamError),
    /// Capture subprocess failure
    Capture(CaptureError),
    /// Request refused because no booth identity is registered
    IdentityRequired,
    /// Effect name not in the known set
    InvalidEffect(String),
    /// JSON encode/decode failure
    Json(serde_json::Error),
}

impl Error {
    /// Short machine-readable code sent as the `error` field of failure replies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Protocol(_) => "protocol_error",
            Error::Handshake(_) => "handshake_failed",
            Error::Stream(e) => e.code(),
            Error::Capture(e) => e.code(),
            Error::IdentityRequired => "identity_required",
            Error::InvalidEffect(_) => "invalid_effect",
            Error::Json(_) => "invalid_json",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Stream(e) => write!(f, "Stream error: {}", e),
            Error::Capture(e) => write!(f, "Capture error: {}", e),
            Error::IdentityRequired => write!(f, "Booth identity is not registered"),
            Error::InvalidEffect(name) => write!(f, "Invalid effect name: {}", name),
            Error::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Capture(CaptureError::Spawn(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

impl From<CaptureError> for Error {
    fn from(e: CaptureError) -> Self {
        Error::Capture(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

/// WebSocket frame and envelope errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame opcode other than text
    UnsupportedOpcode(u8),
    /// Declared payload length exceeds the configured maximum
    PayloadTooLarge(u64),
    /// Text frame payload is not valid UTF-8
    InvalidUtf8,
    /// Envelope could not be decoded
    MalformedEnvelope(String),
    /// Peer closed the connection mid-frame
    UnexpectedEof,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedOpcode(op) => write!(f, "Unsupported opcode: 0x{:x}", op),
            ProtocolError::PayloadTooLarge(len) => write!(f, "Payload too large: {} bytes", len),
            ProtocolError::InvalidUtf8 => write!(f, "Text frame is not valid UTF-8"),
            ProtocolError::MalformedEnvelope(msg) => write!(f, "Malformed envelope: {}", msg),
            ProtocolError::UnexpectedEof => write!(f, "Unexpected end of stream"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// HTTP request head and upgrade errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Request head exceeded the size limit before `\r\n\r\n`
    HeadTooLarge(usize),
    /// Request line could not be parsed
    MalformedRequest(String),
    /// Upgrade request without `Sec-WebSocket-Key`
    MissingKey,
    /// Peer closed before the request head completed
    ConnectionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::HeadTooLarge(n) => write!(f, "Request head exceeds {} bytes", n),
            HandshakeError::MalformedRequest(line) => write!(f, "Malformed request line: {}", line),
            HandshakeError::MissingKey => write!(f, "Missing Sec-WebSocket-Key header"),
            HandshakeError::ConnectionClosed => write!(f, "Connection closed during handshake"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Preview stream state machine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// `start_stream` called while not idle
    AlreadyActive,
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::AlreadyActive => "already_active",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::AlreadyActive => write!(f, "Stream already active"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Capture subprocess errors
#[derive(Debug)]
pub enum CaptureError {
    /// Tool could not be launched (missing binary, pipe creation failure)
    Spawn(io::Error),
    /// Child was spawned without the requested pipe
    MissingPipe(&'static str),
    /// Single-shot command exited without producing its output file
    NoOutput(String),
    /// Forced kill of a capture process failed
    KillFailed(io::Error),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Spawn(_) | CaptureError::MissingPipe(_) => "spawn_failed",
            CaptureError::NoOutput(_) => "photo_not_created",
            CaptureError::KillFailed(_) => "kill_failed",
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Spawn(e) => write!(f, "Failed to launch capture tool: {}", e),
            CaptureError::MissingPipe(name) => write!(f, "Capture tool has no {} pipe", name),
            CaptureError::NoOutput(path) => write!(f, "Output file not created: {}", path),
            CaptureError::KillFailed(e) => write!(f, "Failed to kill capture process: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}
