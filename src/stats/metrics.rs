//! Statistics for capture sessions and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How often the frame reader logs progress
pub const FRAME_LOG_INTERVAL: u64 = 30;

/// Per capture session statistics
#[derive(Debug, Clone)]
pub struct CaptureStats {
    /// When the capture process was started
    pub started_at: Instant,
    /// Raw bytes read from the capture pipe
    pub bytes_read: u64,
    /// Frames extracted and broadcast
    pub frames: u64,
    /// Bytes of extracted frames
    pub frame_bytes: u64,
    /// Bytes discarded by the demux buffer ceiling
    pub bytes_discarded: u64,
    /// Viewers dropped after a failed write
    pub dropped_viewers: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_read: 0,
            frames: 0,
            frame_bytes: 0,
            bytes_discarded: 0,
            dropped_viewers: 0,
        }
    }

    /// Time since the session started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record one broadcast frame; true when a progress line is due
    pub fn record_frame(&mut self, len: usize, dropped_viewers: usize) -> bool {
        self.frames += 1;
        self.frame_bytes += len as u64;
        self.dropped_viewers += dropped_viewers as u64;
        self.frames % FRAME_LOG_INTERVAL == 0
    }

    /// Average frames per second over the session
    pub fn framerate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean size of an extracted frame
    pub fn average_frame_size(&self) -> u64 {
        if self.frames > 0 {
            self.frame_bytes / self.frames
        } else {
            0
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Control connections accepted since start
    pub total_connections: u64,
    /// Control connections currently open
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
}

/// Live counters behind [`ServerStats`]
#[derive(Debug, Default)]
pub struct ServerCounters {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
        }
    }
}
