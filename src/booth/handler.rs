//! Photo booth event handler
//!
//! Replies are always sent as events with a `success` flag, so a failed
//! command never closes the control connection.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::coordinator::{CaptureCoordinator, PreviewMode};
use super::effects::EffectSettings;
use super::identity::{IdentityRecord, IdentityStore};
use super::photos::{delete_photo, is_safe_name, list_photos, serve_upload, UPLOADS_PREFIX};
use crate::capture::Camera;
use crate::error::{Error, Result};
use crate::protocol::{EventPayload, Request, Response};
use crate::server::config::ServerConfig;
use crate::server::handler::{not_found, BoothEvent, EventHandler};
use crate::session::EventContext;
use crate::stats::ServerStats;
use crate::stream::StreamingOrchestrator;

const FRONTEND_EFFECTS: &str = "Effect processing moved to frontend";

fn failure(error: &Error) -> Value {
    json!({
        "success": false,
        "error": error.code(),
        "message": error.to_string(),
    })
}

/// [`EventHandler`] for a camera booth
pub struct BoothHandler<C: Camera> {
    coordinator: Arc<CaptureCoordinator<C>>,
    streams: Arc<StreamingOrchestrator>,
    identity: IdentityStore,
    effect: RwLock<EffectSettings>,
    require_identity: bool,
    uploads_dir: PathBuf,
    default_fps: u32,
}

impl<C: Camera> BoothHandler<C> {
    pub fn new(config: &ServerConfig, camera: C) -> Self {
        let streams = Arc::new(StreamingOrchestrator::new(
            config.capture.clone(),
            &config.public_host,
            config.mjpeg_addr.port(),
        ));
        let coordinator = Arc::new(CaptureCoordinator::new(camera, Arc::clone(&streams), config));

        Self {
            coordinator,
            streams,
            identity: IdentityStore::new(config.identity_file()),
            effect: RwLock::new(EffectSettings::default()),
            require_identity: config.require_identity,
            uploads_dir: config.uploads_dir.clone(),
            default_fps: config.capture.default_preview_fps,
        }
    }

    pub fn coordinator(&self) -> &Arc<CaptureCoordinator<C>> {
        &self.coordinator
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// Currently selected effect
    pub async fn effect(&self) -> EffectSettings {
        self.effect.read().await.clone()
    }

    /// Whether camera commands are allowed
    async fn identity_ok(&self) -> bool {
        !self.require_identity || self.identity.has_identity().await
    }

    async fn detect_camera(&self, ctx: &EventContext) {
        if !self.identity_ok().await {
            ctx.emit("camera-detected", &failure(&Error::IdentityRequired));
            return;
        }

        match self.coordinator.detect().await {
            Ok(cameras) => {
                tracing::info!(session_id = ctx.session_id, count = cameras.len(), "Camera detection finished");
                let list: Vec<Value> = cameras
                    .iter()
                    .map(|c| json!({ "model": c.model, "port": c.port }))
                    .collect();
                ctx.emit(
                    "camera-detected",
                    &json!({
                        "success": !cameras.is_empty(),
                        "count": cameras.len(),
                        "cameras": list,
                    }),
                );
            }
            Err(e) => {
                tracing::warn!(session_id = ctx.session_id, error = %e, "Camera detection failed");
                ctx.emit("camera-detected", &failure(&e));
            }
        }
    }

    async fn start_preview(&self, ctx: &EventContext, payload: &EventPayload) {
        if !self.identity_ok().await {
            let mut reply = failure(&Error::IdentityRequired);
            reply["mjpeg"] = json!(false);
            ctx.emit("preview-started", &reply);
            return;
        }

        let fps = match payload.get_i64("fps") {
            Some(fps) if fps > 0 => u32::try_from(fps).unwrap_or(u32::MAX),
            _ => self.default_fps,
        };

        match self.coordinator.start_preview(ctx.reply(), fps).await {
            Ok(PreviewMode::Mjpeg(info)) => {
                ctx.emit(
                    "mjpeg-stream-started",
                    &json!({ "success": true, "streamUrl": info.url, "port": info.port }),
                );
                ctx.emit("preview-started", &json!({ "success": true, "mjpeg": true }));
            }
            Ok(PreviewMode::Polling { fps }) => {
                ctx.emit(
                    "preview-started",
                    &json!({ "success": true, "mjpeg": false, "fps": fps }),
                );
            }
            Err(e) => {
                tracing::warn!(session_id = ctx.session_id, error = %e, "Preview failed to start");
                let mut reply = failure(&e);
                reply["mjpeg"] = json!(false);
                ctx.emit("preview-started", &reply);
            }
        }
    }

    async fn stop_preview(&self, ctx: &EventContext) -> Result<()> {
        if !self.identity_ok().await {
            tracing::debug!(session_id = ctx.session_id, "stop-preview ignored without identity");
            return Ok(());
        }

        self.coordinator.stop_preview(ctx.session_id).await?;
        ctx.emit("mjpeg-stream-stopped", &json!({ "success": true }));
        Ok(())
    }

    async fn stop_mjpeg(&self, ctx: &EventContext) -> Result<()> {
        if !self.identity_ok().await {
            tracing::debug!(session_id = ctx.session_id, "stop-mjpeg ignored without identity");
            return Ok(());
        }

        if self.coordinator.stop_stream().await? {
            ctx.emit("mjpeg-stream-stopped", &json!({ "success": true }));
        }
        Ok(())
    }

    async fn capture_photo(&self, ctx: &EventContext) {
        if !self.identity_ok().await {
            ctx.emit("photo-captured", &failure(&Error::IdentityRequired));
            return;
        }

        let capture = match self.coordinator.begin_capture().await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!(session_id = ctx.session_id, error = %e, "Could not take the camera for capture");
                ctx.emit("photo-captured", &failure(&e));
                return;
            }
        };

        if capture.interrupted_stream() {
            ctx.broadcast("mjpeg-stream-stopped", &json!({ "success": true }))
                .await;
        }

        match capture.capture().await {
            Ok(photo) => {
                ctx.emit(
                    "photo-captured",
                    &json!({
                        "success": true,
                        "filename": photo.filename,
                        "filepath": photo.path.display().to_string(),
                        "url": photo.url,
                        "timestamp": photo.timestamp,
                    }),
                );
                ctx.broadcast(
                    "photoCaptured",
                    &json!({
                        "filename": photo.filename,
                        "path": photo.url,
                        "timestamp": photo.timestamp,
                        "simulated": false,
                    }),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(session_id = ctx.session_id, error = %e, "Photo capture failed");
                ctx.emit("photo-captured", &failure(&e));
            }
        }
    }

    /// Store new settings; `reply`/`broadcast` name the events to send
    async fn update_effect(
        &self,
        ctx: &EventContext,
        payload: &EventPayload,
        reply: &str,
        broadcast: &str,
    ) -> Option<EffectSettings> {
        let settings = match EffectSettings::from_payload(payload) {
            Ok(settings) => settings,
            Err(e) => {
                ctx.emit(reply, &failure(&e));
                return None;
            }
        };

        *self.effect.write().await = settings.clone();
        tracing::debug!(session_id = ctx.session_id, effect = %settings.effect, "Effect updated");

        let mut value = settings.to_json();
        value["success"] = json!(true);
        value["note"] = json!(FRONTEND_EFFECTS);
        ctx.emit(reply, &value);
        ctx.broadcast(broadcast, &settings.to_json()).await;
        Some(settings)
    }

    async fn apply_effect(&self, ctx: &EventContext, payload: &EventPayload) {
        if payload.get_bool("currentPhoto") == Some(true) {
            if let Some(filename) = payload.get("filename") {
                ctx.emit(
                    "photo-effect-applied",
                    &json!({
                        "success": false,
                        "filename": filename,
                        "effect": payload.get("effect").unwrap_or("none"),
                        "message": FRONTEND_EFFECTS,
                        "note": "Please use frontend Canvas API for effect processing",
                    }),
                );
            }
        }
        self.update_effect(ctx, payload, "effect-applied", "effectApplied")
            .await;
    }

    async fn status(&self, stats: &ServerStats) -> Response {
        let (connected, message) = match self.coordinator.detect().await {
            Ok(cameras) if !cameras.is_empty() => (true, format!("{} camera(s) detected", cameras.len())),
            Ok(_) => (false, "No camera detected".to_string()),
            Err(e) => (false, e.to_string()),
        };

        Response::json(
            200,
            &json!({
                "cameraConnected": connected,
                "message": message,
                "streaming": self.streams.is_active(),
                "clients": self.streams.client_count().await,
                "activeConnections": stats.active_connections,
            }),
        )
    }

    async fn get_identity(&self) -> Response {
        let Some(record) = self.identity.latest().await else {
            return Response::json(200, &json!({ "success": false }));
        };
        match serde_json::to_value(&record) {
            Ok(mut value) => {
                value["success"] = json!(true);
                Response::json(200, &value)
            }
            Err(e) => Response::json(500, &failure(&e.into())),
        }
    }

    async fn post_identity(&self, body: &[u8]) -> Response {
        let record = match IdentityRecord::from_registration(body) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Response::json(
                    400,
                    &json!({
                        "success": false,
                        "error": "store_failed",
                        "message": "booth_name and location are required",
                    }),
                )
            }
            Err(e) => {
                return Response::json(
                    400,
                    &json!({ "success": false, "error": "store_failed", "message": e.to_string() }),
                )
            }
        };

        match self.identity.save(record).await {
            Ok(()) => Response::json(200, &json!({ "success": true })),
            Err(e) => {
                tracing::error!(error = %e, "Failed to store booth identity");
                Response::json(
                    500,
                    &json!({ "success": false, "error": "store_failed", "message": e.to_string() }),
                )
            }
        }
    }

    async fn delete_photo(&self, name: &str) -> Response {
        if !is_safe_name(name) {
            return Response::json(400, &json!({ "success": false, "error": "invalid_filename" }));
        }
        if delete_photo(&self.uploads_dir, name).await {
            Response::json(200, &json!({ "success": true }))
        } else {
            Response::json(404, &json!({ "success": false, "error": "not_found" }))
        }
    }
}

impl<C: Camera> EventHandler for BoothHandler<C> {
    async fn handle(&self, ctx: &EventContext, event: BoothEvent, payload: EventPayload) -> Result<()> {
        match event {
            BoothEvent::DetectCamera => self.detect_camera(ctx).await,
            BoothEvent::StartPreview => self.start_preview(ctx, &payload).await,
            BoothEvent::StopPreview => self.stop_preview(ctx).await?,
            BoothEvent::StopMjpeg => self.stop_mjpeg(ctx).await?,
            BoothEvent::CapturePhoto => self.capture_photo(ctx).await,
            BoothEvent::SetEffect => {
                self.update_effect(ctx, &payload, "effect-changed", "effectChanged")
                    .await;
            }
            BoothEvent::GetEffect => {
                let mut value = self.effect().await.to_json();
                value["success"] = json!(true);
                ctx.emit("current-effect", &value);
            }
            BoothEvent::ApplyEffect => self.apply_effect(ctx, &payload).await,
        }
        Ok(())
    }

    async fn http(&self, request: Request, stats: ServerStats) -> Response {
        let method = request.method.as_str();
        let path = request.path.as_str();

        if method == "GET" {
            if let Some(name) = path.strip_prefix(UPLOADS_PREFIX) {
                return serve_upload(&self.uploads_dir, name).await;
            }
        }
        if method == "DELETE" {
            if let Some(name) = path.strip_prefix("/api/photos/") {
                return self.delete_photo(name).await;
            }
        }

        match (method, path) {
            ("GET", "/api/status") => self.status(&stats).await,
            ("GET", "/api/photos") => {
                let photos = list_photos(&self.uploads_dir).await;
                Response::json(200, &json!({ "photos": photos }))
            }
            ("GET", "/api/identity") => self.get_identity().await,
            ("POST", "/api/identity") => self.post_identity(&request.body).await,
            ("GET", "/api/preview") => match self.coordinator.preview_frame().await {
                Ok(frame) => Response::json(200, &frame),
                Err(e) => Response::json(503, &failure(&e)),
            },
            _ => not_found(),
        }
    }

    fn stream(&self) -> Option<&Arc<StreamingOrchestrator>> {
        Some(&self.streams)
    }

    async fn on_disconnect(&self, ctx: &EventContext) {
        self.coordinator.stop_poller(ctx.session_id).await;
    }

    async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
