//! MJPEG viewer endpoint
//!
//! Routes on the MJPEG listener:
//!
//! - `GET /camera`: multipart stream; the connection joins the registry
//! - `GET /health`: `{"status":"ok","streaming":..,"clients":..}`
//! - `OPTIONS *`: CORS preflight
//! - anything else: `404 Not Found`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::orchestrator::StreamingOrchestrator;
use crate::media::multipart::stream_preamble;
use crate::protocol::http::{read_request, Response};

const ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept";

/// Serve one connection accepted on the MJPEG listener
pub async fn handle_viewer(
    mut socket: TcpStream,
    peer: SocketAddr,
    streams: Arc<StreamingOrchestrator>,
    max_head: usize,
    head_timeout: Duration,
) {
    let mut buf = BytesMut::with_capacity(1024);
    let request = match tokio::time::timeout(head_timeout, read_request(&mut socket, &mut buf, max_head)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer, error = %e, "Failed to read MJPEG request");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = %peer, "MJPEG request timed out");
            return;
        }
    };

    tracing::debug!(peer = %peer, method = %request.method, path = %request.path, "MJPEG request");

    let response = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/camera") => {
            serve_stream(socket, peer, streams).await;
            return;
        }
        ("GET", "/health") => Response::json(
            200,
            &json!({
                "status": "ok",
                "streaming": streams.is_active(),
                "clients": streams.client_count().await,
            }),
        )
        .header("Access-Control-Allow-Origin", "*"),
        ("OPTIONS", _) => Response::new(200)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", ALLOW_HEADERS),
        _ => Response::text(404, "Not Found")
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Headers", ALLOW_HEADERS),
    };

    if let Err(e) = socket.write_all(&response.encode()).await {
        tracing::debug!(peer = %peer, error = %e, "Failed to write MJPEG response");
    }
    let _ = socket.shutdown().await;
}

/// Write the multipart preamble, register, then watch for the peer leaving
async fn serve_stream(mut socket: TcpStream, peer: SocketAddr, streams: Arc<StreamingOrchestrator>) {
    if let Err(e) = socket.write_all(&stream_preamble()).await {
        tracing::debug!(peer = %peer, error = %e, "Failed to send MJPEG preamble");
        return;
    }

    let (mut reader, writer) = socket.into_split();
    let registry = Arc::clone(streams.registry());
    let mut handle = registry.register(writer, Some(peer)).await;

    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            _ = &mut handle.closed => break,
            read = reader.read(&mut scratch) => match read {
                Ok(0) => {
                    tracing::debug!(peer = %peer, "MJPEG viewer disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "MJPEG viewer read failed");
                    break;
                }
            },
        }
    }

    registry.remove(handle.id).await;
}
