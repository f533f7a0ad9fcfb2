//! One run of the continuous capture process
//!
//! A session owns the capture child plus two tasks:
//!
//! ```text
//!   stdout ──► frame reader ──► FrameDemuxer ──► ViewerRegistry::broadcast
//!   stderr ──► error drain ───► tracing (benign status lines filtered)
//! ```
//!
//! Both tasks watch the session's shutdown signal on every iteration. Each
//! hands its pipe back when it exits so the pipes stay open until the
//! process itself has been stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::{CapturePipes, CaptureProcess, StopOutcome};
use crate::error::CaptureError;
use crate::media::FrameDemuxer;
use crate::registry::{Frame, ViewerRegistry};
use crate::server::config::CaptureConfig;
use crate::stats::CaptureStats;

/// Status lines the capture tool prints during normal operation
const BENIGN_STDERR: [&str; 2] = ["Capturing preview frames as movie", "NEW folder"];

/// Whether a stderr chunk is worth reporting
pub fn is_benign_stderr(text: &str) -> bool {
    BENIGN_STDERR.iter().any(|marker| text.contains(marker))
}

/// A running capture process and its reader tasks
pub struct CaptureSession {
    id: u64,
    process: CaptureProcess,
    shutdown: watch::Sender<bool>,
    reader: JoinHandle<(ChildStdout, CaptureStats)>,
    drain: JoinHandle<ChildStderr>,
}

impl CaptureSession {
    /// Spawn the reader and drain tasks for a freshly started process
    pub fn start(
        id: u64,
        process: CaptureProcess,
        pipes: CapturePipes,
        registry: Arc<ViewerRegistry>,
        config: &CaptureConfig,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let reader = tokio::spawn(read_frames(
            id,
            pipes.stdout,
            registry,
            FrameDemuxer::with_limits(config.buffer_cap, config.retained_tail),
            rx.clone(),
            config.read_chunk,
            config.read_retry,
        ));
        let drain = tokio::spawn(drain_stderr(id, pipes.stderr, rx, config.read_retry));

        tracing::debug!(stream_id = id, pid = process.pid(), "Capture session started");

        Self {
            id,
            process,
            shutdown,
            reader,
            drain,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Stop the tasks, then the process, then close the pipes
    pub async fn stop(
        self,
        grace: Duration,
        poll: Duration,
    ) -> Result<(StopOutcome, CaptureStats), CaptureError> {
        let _ = self.shutdown.send(true);

        let (stdout, stats) = match self.reader.await {
            Ok((stdout, stats)) => (Some(stdout), stats),
            Err(e) => {
                tracing::warn!(stream_id = self.id, error = %e, "Frame reader task failed");
                (None, CaptureStats::new())
            }
        };
        let stderr = self.drain.await.ok();

        let outcome = self.process.stop(grace, poll).await;

        drop(stdout);
        drop(stderr);

        tracing::info!(
            stream_id = self.id,
            frames = stats.frames,
            bytes_read = stats.bytes_read,
            dropped_viewers = stats.dropped_viewers,
            bytes_discarded = stats.bytes_discarded,
            duration_secs = stats.duration().as_secs(),
            "Capture session ended"
        );

        outcome.map(|o| (o, stats))
    }
}

async fn read_frames(
    stream_id: u64,
    mut stdout: ChildStdout,
    registry: Arc<ViewerRegistry>,
    mut demux: FrameDemuxer,
    mut shutdown: watch::Receiver<bool>,
    chunk_size: usize,
    retry: Duration,
) -> (ChildStdout, CaptureStats) {
    let mut stats = CaptureStats::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut eof_logged = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = stdout.read(&mut chunk) => read,
        };

        let n = match read {
            Ok(n) if n > 0 => n,
            Ok(_) => {
                if !eof_logged {
                    tracing::warn!(stream_id, "Capture process closed its output");
                    eof_logged = true;
                }
                0
            }
            Err(e) => {
                tracing::debug!(stream_id, error = %e, "Capture pipe read failed");
                0
            }
        };

        if n == 0 {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(retry) => continue,
            }
        }

        stats.bytes_read += n as u64;
        stats.bytes_discarded += demux.push(&chunk[..n]) as u64;

        while let Some(data) = demux.next_frame() {
            let frame = Frame::new(demux.frame_count(), data);
            let report = registry.broadcast(&frame).await;

            if stats.record_frame(frame.len(), report.dropped) {
                tracing::info!(
                    stream_id,
                    frames = stats.frames,
                    viewers = report.delivered,
                    fps = stats.framerate(),
                    "Sent {} MJPEG frames",
                    stats.frames
                );
            }
        }
    }

    (stdout, stats)
}

async fn drain_stderr(
    stream_id: u64,
    mut stderr: ChildStderr,
    mut shutdown: watch::Receiver<bool>,
    retry: Duration,
) -> ChildStderr {
    let mut buf = [0u8; 4096];

    loop {
        if *shutdown.borrow() {
            break;
        }

        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = stderr.read(&mut buf) => read,
        };

        match read {
            Ok(n) if n > 0 => {
                let text = String::from_utf8_lossy(&buf[..n]);
                if !is_benign_stderr(&text) {
                    tracing::warn!(stream_id, message = %text.trim(), "Capture tool error output");
                }
            }
            _ => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }
    }

    stderr
}
