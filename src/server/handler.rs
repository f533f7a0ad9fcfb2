//! Event handler trait and dispatch
//!
//! Implement [`EventHandler`] to give the control channel its behaviour. The
//! connection layer decodes envelopes, matches the event name against
//! [`BoothEvent`] and calls [`EventHandler::handle`] inline, so events from
//! one connection are handled strictly in order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::protocol::{EventPayload, Request, Response};
use crate::session::EventContext;
use crate::stats::ServerStats;
use crate::stream::StreamingOrchestrator;

/// Inbound control events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoothEvent {
    DetectCamera,
    StartPreview,
    StopPreview,
    StopMjpeg,
    CapturePhoto,
    SetEffect,
    GetEffect,
    ApplyEffect,
}

impl BoothEvent {
    pub const ALL: [BoothEvent; 8] = [
        BoothEvent::DetectCamera,
        BoothEvent::StartPreview,
        BoothEvent::StopPreview,
        BoothEvent::StopMjpeg,
        BoothEvent::CapturePhoto,
        BoothEvent::SetEffect,
        BoothEvent::GetEffect,
        BoothEvent::ApplyEffect,
    ];

    /// Match a wire event name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }

    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            BoothEvent::DetectCamera => "detect-camera",
            BoothEvent::StartPreview => "start-preview",
            BoothEvent::StopPreview => "stop-preview",
            BoothEvent::StopMjpeg => "stop-mjpeg",
            BoothEvent::CapturePhoto => "capture-photo",
            BoothEvent::SetEffect => "set-effect",
            BoothEvent::GetEffect => "get-effect",
            BoothEvent::ApplyEffect => "apply-effect",
        }
    }
}

impl fmt::Display for BoothEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Application callbacks for the control port
///
/// Only [`handle`](EventHandler::handle) is required. The defaults serve no
/// HTTP routes, run no preview stream and do nothing on connect, disconnect
/// or shutdown.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one recognized event
    ///
    /// An `Err` is reported to the sender as an `error` event; the connection
    /// stays open.
    fn handle(
        &self,
        ctx: &EventContext,
        event: BoothEvent,
        payload: EventPayload,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Serve a plain HTTP request received on the control port
    ///
    /// CORS headers are added by the caller.
    fn http(&self, request: Request, stats: ServerStats) -> impl Future<Output = Response> + Send {
        let _ = (request, stats);
        async { not_found() }
    }

    /// Preview stream served on the MJPEG listener, if any
    fn stream(&self) -> Option<&Arc<StreamingOrchestrator>> {
        None
    }

    /// Called once the greeting has been sent
    fn on_connect(&self, ctx: &EventContext) -> impl Future<Output = ()> + Send {
        let _ = ctx;
        async {}
    }

    /// Called after the connection has left the broadcast set
    fn on_disconnect(&self, ctx: &EventContext) -> impl Future<Output = ()> + Send {
        let _ = ctx;
        async {}
    }

    /// Called once when the server stops accepting
    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// `404` with `{"error":"Not Found"}`
pub fn not_found() -> Response {
    Response::json(404, &json!({ "error": "Not Found" }))
}

/// Route one decoded event to `handler`
///
/// Unknown names are logged and ignored. Returns whether the event was
/// recognized.
pub async fn dispatch<H: EventHandler>(
    handler: &H,
    ctx: &EventContext,
    name: &str,
    data: &Value,
) -> bool {
    let Some(event) = BoothEvent::parse(name) else {
        tracing::debug!(session_id = ctx.session_id, event = name, "Ignoring unknown event");
        return false;
    };

    tracing::debug!(session_id = ctx.session_id, event = %event, "Dispatching event");

    if let Err(e) = handler.handle(ctx, event, EventPayload::from_value(data)).await {
        tracing::warn!(
            session_id = ctx.session_id,
            event = %event,
            error = %e,
            "Event handler failed"
        );
        ctx.emit(
            "error",
            &json!({
                "success": false,
                "error": e.code(),
                "message": e.to_string(),
            }),
        );
    }
    true
}
