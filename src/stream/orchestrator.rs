//! Preview stream lifecycle
//!
//! ```text
//!        start_stream()               spawned + tasks running
//!   Idle ───────────────► Starting ───────────────────────► Streaming
//!    ▲                       │ spawn failed                     │
//!    │◄──────────────────────┘                                  │ stop_stream()
//!    │                                                          ▼
//!    └─────────── process stopped, pipes closed ─────────── Stopping
//!                 viewers closed
//! ```
//!
//! Start and stop both run under one async mutex, so a start that races an
//! in-flight stop waits for the stop to finish completely.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::session::CaptureSession;
use crate::error::{Result, StreamError};
use crate::registry::ViewerRegistry;
use crate::server::config::CaptureConfig;

/// Stream lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl StreamPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamPhase::Starting,
            2 => StreamPhase::Streaming,
            3 => StreamPhase::Stopping,
            _ => StreamPhase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StreamPhase::Idle => 0,
            StreamPhase::Starting => 1,
            StreamPhase::Streaming => 2,
            StreamPhase::Stopping => 3,
        }
    }
}

/// Returned by a successful [`StreamingOrchestrator::start_stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: u64,
    pub url: String,
    pub port: u16,
}

/// Owns the single preview stream and the viewers attached to it
pub struct StreamingOrchestrator {
    config: CaptureConfig,
    url: String,
    port: u16,
    registry: Arc<ViewerRegistry>,
    session: Mutex<Option<CaptureSession>>,
    phase: AtomicU8,
    next_stream_id: AtomicU64,
}

impl StreamingOrchestrator {
    /// `public_host`/`port` only shape the URL handed to clients
    pub fn new(config: CaptureConfig, public_host: &str, port: u16) -> Self {
        let registry = Arc::new(ViewerRegistry::with_write_timeout(config.viewer_write_timeout));
        Self {
            url: format!("http://{}:{}/camera", public_host, port),
            port,
            config,
            registry,
            session: Mutex::new(None),
            phase: AtomicU8::new(StreamPhase::Idle.as_u8()),
            next_stream_id: AtomicU64::new(1),
        }
    }

    /// Launch the capture process and start fanning frames out
    ///
    /// Fails with [`StreamError::AlreadyActive`] unless idle. A launch failure
    /// leaves the orchestrator idle.
    pub async fn start_stream(&self) -> Result<StreamInfo> {
        let mut slot = self.session.lock().await;
        if slot.is_some() || self.phase() != StreamPhase::Idle {
            return Err(StreamError::AlreadyActive.into());
        }

        self.set_phase(StreamPhase::Starting);
        let (process, pipes) = match self.config.movie_command().spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                self.set_phase(StreamPhase::Idle);
                tracing::warn!(program = %self.config.program, error = %e, "Failed to start stream");
                return Err(e.into());
            }
        };

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let pid = process.pid();
        *slot = Some(CaptureSession::start(
            id,
            process,
            pipes,
            Arc::clone(&self.registry),
            &self.config,
        ));
        self.set_phase(StreamPhase::Streaming);

        tracing::info!(stream_id = id, pid = pid, url = %self.url, "MJPEG stream started");

        Ok(StreamInfo {
            id,
            url: self.url.clone(),
            port: self.port,
        })
    }

    /// Stop the stream if one is running
    ///
    /// Returns `Ok(false)` without side effects when already idle. Otherwise
    /// the capture process is stopped (interrupt, then kill after the grace
    /// period), its pipes closed and every viewer disconnected. The phase is
    /// back to idle even if the forced kill failed.
    pub async fn stop_stream(&self) -> Result<bool> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return Ok(false);
        };

        self.set_phase(StreamPhase::Stopping);
        let id = session.id();
        tracing::info!(stream_id = id, "Stopping MJPEG stream");

        let stopped = session
            .stop(self.config.stop_grace, self.config.stop_poll)
            .await;
        let viewers = self.registry.close_all().await;
        self.set_phase(StreamPhase::Idle);

        match stopped {
            Ok((outcome, _)) => {
                tracing::info!(stream_id = id, outcome = ?outcome, viewers = viewers, "MJPEG stream stopped");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(stream_id = id, error = %e, "Capture process could not be stopped");
                Err(e.into())
            }
        }
    }

    /// Stop any running stream, wait `settle`, then start a new one
    pub async fn restart_stream(&self, settle: std::time::Duration) -> Result<StreamInfo> {
        if self.stop_stream().await? && !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        self.start_stream().await
    }

    pub fn phase(&self) -> StreamPhase {
        StreamPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether a stream is currently running
    pub fn is_active(&self) -> bool {
        self.phase() == StreamPhase::Streaming
    }

    /// Number of connected viewers
    pub async fn client_count(&self) -> usize {
        self.registry.count().await
    }

    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn set_phase(&self, phase: StreamPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }
}
