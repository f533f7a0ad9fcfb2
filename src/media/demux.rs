//! JPEG frame demuxer
//!
//! A continuous-capture tool writes JPEG images back to back on stdout with no
//! container. Frames are recovered by scanning for the SOI marker and then the
//! first EOI marker after it.
//!
//! ```text
//!   .. junk .. FF D8 ....... FF D9 FF D8 ....... FF D9 FF D8 ....
//!              └── frame 1 ──────┘ └── frame 2 ──────┘ └─ waits ─
//! ```
//!
//! Reads may split a frame, or even a marker, at any byte offset. Extraction
//! only ever yields complete frames, in stream order.

use bytes::{Buf, Bytes, BytesMut};

/// Start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffer ceiling before old bytes are discarded (1 MiB)
pub const DEFAULT_BUFFER_CAP: usize = 1024 * 1024;

/// Bytes kept when the ceiling is exceeded (512 KiB)
pub const DEFAULT_RETAINED_TAIL: usize = 512 * 1024;

/// Incremental SOI/EOI frame extractor
#[derive(Debug)]
pub struct FrameDemuxer {
    buffer: BytesMut,
    cap: usize,
    retain: usize,
    frames: u64,
    discarded: u64,
}

impl FrameDemuxer {
    /// Create a demuxer with the default 1 MiB / 512 KiB limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_CAP, DEFAULT_RETAINED_TAIL)
    }

    /// Create a demuxer with custom limits
    ///
    /// `retain` is clamped to `cap`.
    pub fn with_limits(cap: usize, retain: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(retain.min(cap)),
            cap,
            retain: retain.min(cap),
            frames: 0,
            discarded: 0,
        }
    }

    /// Append raw bytes read from the capture pipe
    ///
    /// Returns the number of old bytes dropped to stay under the ceiling.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() <= self.cap {
            return 0;
        }

        let drop = self.buffer.len() - self.retain;
        self.buffer.advance(drop);
        self.discarded += drop as u64;

        tracing::debug!(
            dropped = drop,
            retained = self.buffer.len(),
            "Demux buffer over ceiling, discarded oldest bytes"
        );

        drop
    }

    /// Extract the next complete frame, if one is buffered
    ///
    /// Bytes before the SOI marker are discarded. A frame whose EOI has not
    /// arrived yet stays buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find(&self.buffer, &SOI) else {
            // A trailing 0xFF may be the first half of a split SOI
            let keep = usize::from(self.buffer.last() == Some(&SOI[0]));
            let junk = self.buffer.len() - keep;
            self.buffer.advance(junk);
            return None;
        };
        self.buffer.advance(start);

        let end = find(&self.buffer[SOI.len()..], &EOI)? + SOI.len() + EOI.len();
        self.frames += 1;
        Some(self.buffer.split_to(end).freeze())
    }

    /// Iterate over all complete frames currently buffered
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { demuxer: self }
    }

    /// Bytes waiting for more input
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames yielded so far
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Bytes dropped by the buffer ceiling so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`FrameDemuxer::frames`]
pub struct Frames<'a> {
    demuxer: &'a mut FrameDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.demuxer.next_frame()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}
