//! WebSocket frame codec
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Server-to-client frames are never masked. Client frames are unmasked by
//! XOR-ing payload byte `i` with `mask[i % 4]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Bytes,
}

impl WsFrame {
    pub fn is_text(&self) -> bool {
        self.opcode == OPCODE_TEXT
    }

    pub fn is_close(&self) -> bool {
        self.opcode == OPCODE_CLOSE
    }

    /// Payload as UTF-8 text
    pub fn text(&self) -> std::result::Result<&str, ProtocolError> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Encode an unmasked FIN text frame
pub fn encode_text(payload: &str) -> Bytes {
    encode_frame(OPCODE_TEXT, payload.as_bytes(), None)
}

/// Encode an unmasked close frame with no status
pub fn encode_close() -> Bytes {
    encode_frame(OPCODE_CLOSE, &[], None)
}

/// Encode a FIN frame, masking the payload when `mask` is given
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 14);
    buf.put_u8(FIN_BIT | (opcode & 0x0F));

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len <= MAX_SHORT_LEN {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(mask_bit | LEN_16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | LEN_64);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            buf.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => buf.put_slice(payload),
    }

    buf.freeze()
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` and consumes nothing while the frame is incomplete.
pub fn decode_frame(
    buf: &mut BytesMut,
    max_payload: usize,
) -> std::result::Result<Option<WsFrame>, ProtocolError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & FIN_BIT != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & MASK_BIT != 0;

    let (len, mut offset) = match b1 & 0x7F {
        LEN_16 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        LEN_64 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        short => (short as u64, 2),
    };

    if len > max_payload as u64 {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    let len = len as usize;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(None);
    }

    buf.advance(offset);
    let mut payload = buf.split_to(len);
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some(WsFrame {
        fin,
        opcode,
        payload: payload.freeze(),
    }))
}

/// Reads frames from an async byte stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_payload: usize) -> Self {
        Self::with_buffer(inner, BytesMut::with_capacity(4096), max_payload)
    }

    /// Start with bytes already read past the HTTP head
    pub fn with_buffer(inner: R, buf: BytesMut, max_payload: usize) -> Self {
        Self {
            inner,
            buf,
            max_payload,
        }
    }

    /// Next frame, or `None` on a clean close between frames
    pub async fn read_frame(&mut self) -> Result<Option<WsFrame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.max_payload)? {
                return Ok(Some(frame));
            }

            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::UnexpectedEof.into());
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
