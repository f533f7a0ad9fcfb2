//! `multipart/x-mixed-replace` framing for MJPEG viewers
//!
//! ```text
//! HTTP/1.1 200 OK
//! Content-Type: multipart/x-mixed-replace; boundary=--frame
//! ...
//!
//! --frame
//! Content-Type: image/jpeg
//! Content-Length: 5120
//!
//! <jpeg bytes>
//! --frame
//! ...
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary line, written before the first part and after each part
pub const BOUNDARY: &str = "--frame";

/// CORS headers shared by every MJPEG listener response
pub const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Headers: Origin, X-Requested-With, Content-Type, Accept\r\n";

/// Response head and opening boundary sent to a new viewer
pub fn stream_preamble() -> Bytes {
    let mut buf = BytesMut::with_capacity(384);
    buf.put_slice(b"HTTP/1.1 200 OK\r\n");
    buf.put_slice(CORS_HEADERS.as_bytes());
    buf.put_slice(b"Content-Type: multipart/x-mixed-replace; boundary=");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Cache-Control: no-cache, no-store, must-revalidate\r\n");
    buf.put_slice(b"Pragma: no-cache\r\n");
    buf.put_slice(b"Expires: 0\r\n");
    buf.put_slice(b"Connection: close\r\n\r\n");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Encode one JPEG as a multipart part followed by the next boundary
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + BOUNDARY.len() + 4);
    buf.put_slice(header.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}
