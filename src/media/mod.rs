//! Motion-JPEG handling
//!
//! This module provides:
//! - Frame extraction from a raw concatenated-JPEG byte stream
//! - `multipart/x-mixed-replace` encoding for browser viewers

pub mod demux;
pub mod multipart;

pub use demux::FrameDemuxer;
pub use multipart::{encode_part, BOUNDARY};
