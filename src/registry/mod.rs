//! Viewer registry for MJPEG fan-out
//!
//! ```text
//!   capture stdout ──► FrameDemuxer ──► ViewerRegistry::broadcast(frame)
//!                                              │
//!                        ┌─────────────────────┼─────────────────────┐
//!                        ▼                     ▼                     ▼
//!                   [viewer 1]            [viewer 2]            [viewer 3]
//!                   write_all             write_all             write fails
//!                                                                    │
//!                                           removed after the loop ◄─┘
//! ```
//!
//! `bytes::Bytes` is reference counted, so the encoded part is built once per
//! frame and written to every viewer without copying.

pub mod entry;
pub mod frame;
pub mod store;

pub use entry::{ViewerHandle, ViewerId, ViewerWriter};
pub use frame::Frame;
pub use store::{BroadcastReport, ViewerRegistry};
