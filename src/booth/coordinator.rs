//! Camera coordination
//!
//! The camera serves one command at a time. Every transition that touches it
//! (starting or stopping the MJPEG stream, a fallback preview frame, a photo)
//! runs under one device lock, and a photo capture first stops the stream:
//!
//! ```text
//!   begin_capture()
//!       │ stop pollers
//!       │ lock device
//!       │ stream active? ── yes ──► stop stream ──► settle delay
//!       ▼                                              │
//!   capture_active = true ◄────────────────────────────┘
//!       │ capture()
//!       │ single-shot capture into uploads/photo_<ms>.jpg
//!       │ stream was active? ── yes ──► cooldown
//!       ▼
//!   capture_active = false, device unlocked
//! ```
//!
//! `capture_active` is only set once the stream is idle, so the stream and a
//! photo capture are never active at the same time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::photos::{now_millis, photo_filename, photo_url};
use crate::capture::{Camera, CameraInfo};
use crate::error::{Result, StreamError};
use crate::server::broadcast::ReplySink;
use crate::server::config::{CaptureConfig, ServerConfig};
use crate::stream::{StreamInfo, StreamingOrchestrator};

/// How `start_preview` ended up delivering frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewMode {
    /// MJPEG stream running
    Mjpeg(StreamInfo),
    /// Stream unavailable; single-shot frames pushed to the requester
    Polling { fps: u32 },
}

/// A photo written to the uploads directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    pub filename: String,
    pub path: PathBuf,
    /// `/uploads/<filename>`
    pub url: String,
    /// Unix millis
    pub timestamp: i64,
}

struct PreviewPoller {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PreviewPoller {
    async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Serializes camera use between the stream, previews and photo capture
pub struct CaptureCoordinator<C: Camera> {
    camera: C,
    streams: Arc<StreamingOrchestrator>,
    device: Mutex<()>,
    capture_active: AtomicBool,
    pollers: Mutex<HashMap<u64, PreviewPoller>>,
    uploads_dir: PathBuf,
    previews_dir: PathBuf,
    capture: CaptureConfig,
}

impl<C: Camera> CaptureCoordinator<C> {
    pub fn new(camera: C, streams: Arc<StreamingOrchestrator>, config: &ServerConfig) -> Self {
        Self {
            camera,
            streams,
            device: Mutex::new(()),
            capture_active: AtomicBool::new(false),
            pollers: Mutex::new(HashMap::new()),
            uploads_dir: config.uploads_dir.clone(),
            previews_dir: config.previews_dir.clone(),
            capture: config.capture.clone(),
        }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn streams(&self) -> &Arc<StreamingOrchestrator> {
        &self.streams
    }

    /// Whether a photo capture currently owns the camera
    pub fn is_capturing(&self) -> bool {
        self.capture_active.load(Ordering::Acquire)
    }

    pub async fn detect(&self) -> Result<Vec<CameraInfo>> {
        self.camera.detect().await
    }

    /// Start the MJPEG stream, restarting it if already running
    ///
    /// If the stream cannot be launched, falls back to pushing single-shot
    /// preview frames to `reply` at `fps`.
    pub async fn start_preview(self: &Arc<Self>, reply: &ReplySink, fps: u32) -> Result<PreviewMode> {
        self.stop_poller(reply.connection_id()).await;

        let _device = self.device.lock().await;
        if self.streams.stop_stream().await? {
            tokio::time::sleep(self.capture.settle_delay).await;
        }

        match self.streams.start_stream().await {
            Ok(info) => Ok(PreviewMode::Mjpeg(info)),
            Err(e) => {
                tracing::warn!(
                    session_id = reply.connection_id(),
                    error = %e,
                    fps = fps,
                    "MJPEG stream unavailable, falling back to preview polling"
                );
                tokio::fs::create_dir_all(&self.previews_dir).await?;
                self.spawn_poller(reply.clone(), fps).await;
                Ok(PreviewMode::Polling { fps })
            }
        }
    }

    /// Stop the stream and the poller owned by `conn_id`
    ///
    /// Returns whether a stream was running.
    pub async fn stop_preview(&self, conn_id: u64) -> Result<bool> {
        self.stop_poller(conn_id).await;
        self.stop_stream().await
    }

    /// Stop the MJPEG stream only
    pub async fn stop_stream(&self) -> Result<bool> {
        let _device = self.device.lock().await;
        self.streams.stop_stream().await
    }

    /// Take the camera for a photo, stopping the stream if it is running
    ///
    /// The returned guard holds the camera until dropped.
    pub async fn begin_capture(&self) -> Result<PhotoCapture<'_, C>> {
        self.stop_all_pollers().await;

        let device = self.device.lock().await;
        let interrupted_stream = self.streams.stop_stream().await?;
        if interrupted_stream {
            tracing::info!("Stream stopped for photo capture");
            tokio::time::sleep(self.capture.settle_delay).await;
        }
        self.capture_active.store(true, Ordering::Release);

        Ok(PhotoCapture {
            coordinator: self,
            _device: device,
            interrupted_stream,
        })
    }

    /// [`begin_capture`](Self::begin_capture) followed by [`PhotoCapture::capture`]
    pub async fn capture_photo(&self) -> Result<CapturedPhoto> {
        self.begin_capture().await?.capture().await
    }

    /// Capture one preview frame as a `previewFrame` payload
    ///
    /// Only the newest `preview_keep` preview files are kept on disk.
    pub async fn preview_frame(&self) -> Result<Value> {
        let _device = self.device.lock().await;
        if self.streams.is_active() {
            return Err(StreamError::AlreadyActive.into());
        }

        tokio::fs::create_dir_all(&self.previews_dir).await?;
        let timestamp = now_millis();
        let path = self.previews_dir.join(format!("preview_{}.jpg", timestamp));
        self.camera.capture_preview(&path).await?;
        let data = tokio::fs::read(&path).await?;
        prune_previews(&self.previews_dir, self.capture.preview_keep).await;

        Ok(json!({
            "success": true,
            "image": format!("data:image/jpeg;base64,{}", STANDARD.encode(&data)),
            "timestamp": timestamp,
        }))
    }

    /// Whether `conn_id` has a preview poller running
    pub async fn is_polling(&self, conn_id: u64) -> bool {
        self.pollers.lock().await.contains_key(&conn_id)
    }

    pub async fn stop_poller(&self, conn_id: u64) -> bool {
        let poller = self.pollers.lock().await.remove(&conn_id);
        match poller {
            Some(poller) => {
                poller.stop().await;
                tracing::debug!(session_id = conn_id, "Preview poller stopped");
                true
            }
            None => false,
        }
    }

    async fn stop_all_pollers(&self) {
        let pollers: Vec<PreviewPoller> = self.pollers.lock().await.drain().map(|(_, p)| p).collect();
        for poller in pollers {
            poller.stop().await;
        }
    }

    async fn spawn_poller(self: &Arc<Self>, reply: ReplySink, fps: u32) {
        let conn_id = reply.connection_id();
        let period = Duration::from_millis((1000 / u64::from(fps.max(1))).max(1));
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_poller(Arc::clone(self), reply, period, stop_rx));

        let previous = self
            .pollers
            .lock()
            .await
            .insert(conn_id, PreviewPoller { stop, task });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        tracing::info!(session_id = conn_id, fps = fps, "Preview poller started");
    }

    /// Stop every poller and the stream
    pub async fn shutdown(&self) {
        self.stop_all_pollers().await;
        if let Err(e) = self.stop_stream().await {
            tracing::warn!(error = %e, "Failed to stop stream on shutdown");
        }
    }
}

/// Exclusive use of the camera for one photo
pub struct PhotoCapture<'a, C: Camera> {
    coordinator: &'a CaptureCoordinator<C>,
    _device: MutexGuard<'a, ()>,
    interrupted_stream: bool,
}

impl<C: Camera> PhotoCapture<'_, C> {
    /// Whether the MJPEG stream was stopped to take this photo
    pub fn interrupted_stream(&self) -> bool {
        self.interrupted_stream
    }

    /// Run the single-shot capture into the uploads directory
    pub async fn capture(self) -> Result<CapturedPhoto> {
        let coordinator = self.coordinator;
        tokio::fs::create_dir_all(&coordinator.uploads_dir).await?;

        let timestamp = now_millis();
        let filename = photo_filename(timestamp);
        let path = coordinator.uploads_dir.join(&filename);

        let result = coordinator.camera.capture_image(&path).await;
        if self.interrupted_stream {
            tokio::time::sleep(coordinator.capture.cooldown).await;
        }
        result?;

        tracing::info!(filename = %filename, "Photo captured");
        Ok(CapturedPhoto {
            url: photo_url(&filename),
            filename,
            path,
            timestamp,
        })
    }
}

impl<C: Camera> Drop for PhotoCapture<'_, C> {
    fn drop(&mut self) {
        self.coordinator.capture_active.store(false, Ordering::Release);
    }
}

async fn run_poller<C: Camera>(
    coordinator: Arc<CaptureCoordinator<C>>,
    reply: ReplySink,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !reply.is_open() {
                    break;
                }
                match coordinator.preview_frame().await {
                    Ok(frame) => {
                        reply.emit("previewFrame", &frame);
                    }
                    Err(e) => {
                        tracing::debug!(session_id = reply.connection_id(), error = %e, "Preview frame failed");
                        reply.emit(
                            "preview-error",
                            &json!({ "success": false, "error": e.code(), "message": e.to_string() }),
                        );
                    }
                }
            }
        }
    }
}

/// Delete all but the newest `keep` preview files in `dir`
async fn prune_previews(dir: &Path, keep: usize) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };

    let mut previews = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("preview_") && name.ends_with(".jpg") {
            previews.push(name);
        }
    }

    // preview_<millis>.jpg: longer means newer, then lexical
    previews.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| b.cmp(a)));
    for name in previews.into_iter().skip(keep) {
        if let Err(e) = tokio::fs::remove_file(dir.join(&name)).await {
            tracing::debug!(name = %name, error = %e, "Failed to remove old preview");
        }
    }
}
