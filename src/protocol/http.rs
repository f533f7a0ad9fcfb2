//! Minimal HTTP/1.1 request parsing and response building
//!
//! Both listeners speak just enough HTTP to route a request: read the head up
//! to `\r\n\r\n`, split method/path/query/headers, optionally read a
//! `Content-Length` body. Bytes read past the head stay in the caller's
//! buffer; on the control port they may already be WebSocket frames.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{HandshakeError, Result};

/// A parsed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Path without the query string
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    /// Parse a request head (without the terminating blank line)
    pub fn parse_head(head: &str) -> std::result::Result<Self, HandshakeError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Err(HandshakeError::MalformedRequest(request_line.to_string()));
        };
        let version = parts.next().unwrap_or("HTTP/1.1");

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path,
            query,
            version: version.to_string(),
            headers,
            body: Bytes::new(),
        })
    }

    /// First header named `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Upgrade: websocket` present
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("websocket")))
            .unwrap_or(false)
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Value of one query parameter (no percent-decoding)
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Read one request head from `reader`, buffering into `buf`
///
/// Leftover bytes after the head remain in `buf`.
pub async fn read_request<R>(reader: &mut R, buf: &mut BytesMut, max_head: usize) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            let head = buf.split_to(end + 4);
            let text = String::from_utf8_lossy(&head[..end]);
            return Ok(Request::parse_head(&text)?);
        }

        if buf.len() > max_head {
            return Err(HandshakeError::HeadTooLarge(max_head).into());
        }

        if reader.read_buf(buf).await? == 0 {
            return Err(HandshakeError::ConnectionClosed.into());
        }
    }
}

/// Read a `Content-Length` body into `request.body`
pub async fn read_body<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    request: &mut Request,
    max_body: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let len = request.content_length().min(max_body);
    while buf.len() < len {
        if reader.read_buf(buf).await? == 0 {
            return Err(HandshakeError::ConnectionClosed.into());
        }
    }
    request.body = buf.split_to(len).freeze();
    Ok(())
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// CORS headers attached to every control-port response
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

/// An HTTP response, always sent with `Connection: close`
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    pub fn text(status: u16, text: &str) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain")
            .body(text.to_string())
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_cors(mut self) -> Self {
        for (name, value) in CORS_HEADERS {
            self.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Serialize status line, headers and body
    pub fn encode(&self) -> Bytes {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut out = BytesMut::with_capacity(head.len() + self.body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&self.body);
        out.freeze()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
