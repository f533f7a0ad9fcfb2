//! Statistics

pub mod metrics;

pub use metrics::{CaptureStats, ServerCounters, ServerStats, FRAME_LOG_INTERVAL};
