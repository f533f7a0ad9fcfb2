//! Frame type fanned out to viewers

use bytes::Bytes;

use crate::media::demux::{EOI, SOI};

/// One complete JPEG image taken from the capture stream
///
/// Cheap to clone: `Bytes` is reference counted, so every viewer shares the
/// same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the capture session, starting at 1
    pub sequence: u64,
    /// JPEG bytes including SOI and EOI markers
    pub data: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Starts with SOI and ends with EOI
    pub fn is_jpeg(&self) -> bool {
        self.data.len() >= 4 && self.data.starts_with(&SOI) && self.data.ends_with(&EOI)
    }
}
