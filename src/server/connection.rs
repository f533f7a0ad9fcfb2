//! Control connection
//!
//! One task per accepted control-port socket:
//!
//! ```text
//!   read request head
//!        │
//!        ├── no Upgrade ──► read body ──► handler.http() ──► write response, close
//!        │
//!        └── Upgrade: websocket
//!               │ 101 Switching Protocols
//!               │ greeting (open + connect ack, or "connected")
//!               ▼
//!            read frame ◄──────────────────────────────┐
//!               │ ping ──► pong ─────────────────────────┤
//!               │ event ──► dispatch (inline) ───────────┘
//!               │ close / EOF / non-text / bad envelope
//!               ▼
//!            unregister, on_disconnect, close writer
//! ```
//!
//! Outbound frames go through an unbounded channel to a dedicated writer task,
//! so handlers and broadcasts never hold the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::protocol::envelope::generate_sid;
use crate::protocol::frame::{encode_close, encode_text};
use crate::protocol::handshake::upgrade_response;
use crate::protocol::http::{read_body, read_request};
use crate::protocol::{FrameReader, OpenParams, Packet, Request, Response};
use crate::server::broadcast::{Broadcaster, Outbound, ReplySink};
use crate::server::config::ServerConfig;
use crate::server::handler::{dispatch, EventHandler};
use crate::session::{EventContext, SessionState};
use crate::stats::ServerCounters;

/// A single control-port connection
pub struct Connection<H: EventHandler> {
    state: SessionState,
    socket: TcpStream,
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    broadcaster: Arc<Broadcaster>,
    counters: Arc<ServerCounters>,
}

impl<H: EventHandler> Connection<H> {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: Arc<ServerConfig>,
        handler: Arc<H>,
        broadcaster: Arc<Broadcaster>,
        counters: Arc<ServerCounters>,
    ) -> Self {
        Self {
            state: SessionState::new(session_id, peer_addr),
            socket,
            config,
            handler,
            broadcaster,
            counters,
        }
    }

    /// Drive the connection to completion
    pub async fn run(mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(4096);
        let request = match tokio::time::timeout(
            self.config.connection_timeout,
            read_request(&mut self.socket, &mut buf, self.config.max_request_head),
        )
        .await
        {
            Ok(request) => request?,
            Err(_) => {
                tracing::debug!(session_id = self.state.id, "Request head timed out");
                return Ok(());
            }
        };

        if request.is_websocket_upgrade() {
            self.run_websocket(request, buf).await
        } else {
            self.serve_http(request, buf).await
        }
    }

    async fn serve_http(mut self, mut request: Request, mut buf: BytesMut) -> Result<()> {
        let body = tokio::time::timeout(
            self.config.connection_timeout,
            read_body(&mut self.socket, &mut buf, &mut request, self.config.max_request_body),
        )
        .await;
        match body {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(session_id = self.state.id, "Request body timed out");
                return Ok(());
            }
        }

        let method = request.method.clone();
        let path = request.path.clone();
        let response = if method == "OPTIONS" {
            Response::new(200)
        } else {
            self.handler.http(request, self.counters.snapshot()).await
        };

        tracing::debug!(
            session_id = self.state.id,
            method = %method,
            path = %path,
            status = response.status,
            "HTTP request served"
        );

        self.socket.write_all(&response.with_cors().encode()).await?;
        let _ = self.socket.shutdown().await;
        Ok(())
    }

    async fn run_websocket(self, request: Request, buf: BytesMut) -> Result<()> {
        let Connection {
            mut state,
            mut socket,
            config,
            handler,
            broadcaster,
            ..
        } = self;
        let id = state.id;
        state.start_handshake();

        let accept = match upgrade_response(&request) {
            Ok(accept) => accept,
            Err(e) => {
                let response = Response::text(400, "Bad Request").with_cors();
                let _ = socket.write_all(&response.encode()).await;
                return Err(e.into());
            }
        };
        socket.write_all(&accept).await?;

        let (reader, writer) = socket.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(id, writer, rx));
        let sink = ReplySink::new(id, config.dialect, tx);

        let sid = generate_sid();
        let open = OpenParams {
            sid: sid.clone(),
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
        };
        for packet in config.dialect.greeting(&open) {
            sink.send_raw(packet);
        }
        state.open(sid.clone());
        broadcaster.register(sink.clone()).await;

        tracing::info!(
            session_id = id,
            peer = %state.peer_addr,
            sid = %sid,
            "Control client connected"
        );

        let ctx = EventContext::new(id, state.peer_addr, sid, sink.clone(), Arc::clone(&broadcaster));
        handler.on_connect(&ctx).await;

        let mut frames = FrameReader::with_buffer(reader, buf, config.max_payload);
        let result = read_loop(&mut state, &config, handler.as_ref(), &mut frames, &ctx).await;

        state.close();
        broadcaster.unregister(id).await;
        handler.on_disconnect(&ctx).await;
        sink.close();
        drop(ctx);
        drop(sink);
        let _ = writer_task.await;
        state.finish();

        tracing::info!(
            session_id = id,
            frames = state.frames_received,
            events = state.events_dispatched,
            duration_secs = state.duration().as_secs(),
            "Control client disconnected"
        );

        result
    }
}

async fn read_loop<H: EventHandler>(
    state: &mut SessionState,
    config: &ServerConfig,
    handler: &H,
    frames: &mut FrameReader<OwnedReadHalf>,
    ctx: &EventContext,
) -> Result<()> {
    let dialect = config.dialect;
    let idle = config.idle_timeout;

    loop {
        let frame = if idle.is_zero() {
            frames.read_frame().await?
        } else {
            match tokio::time::timeout(idle, frames.read_frame()).await {
                Ok(frame) => frame?,
                Err(_) => {
                    tracing::debug!(session_id = state.id, "Control client idle, closing");
                    return Ok(());
                }
            }
        };

        let Some(frame) = frame else {
            return Ok(());
        };
        state.on_frame();

        if frame.is_close() {
            return Ok(());
        }
        if !frame.is_text() {
            return Err(ProtocolError::UnsupportedOpcode(frame.opcode).into());
        }

        match dialect.decode(frame.text()?)? {
            Packet::Ping(payload) => {
                state.on_ping();
                if let Some(pong) = dialect.encode_pong(&payload) {
                    ctx.reply().send_raw(pong);
                }
            }
            Packet::Event { name, data } => {
                state.on_event();
                dispatch(handler, ctx, &name, &data).await;
            }
            Packet::Close => return Ok(()),
            Packet::Pong | Packet::Connect | Packet::Noop => {}
        }
    }
}

/// Drain queued frames to the socket until closed or the peer is gone
async fn write_loop(
    session_id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = rx.recv().await {
        let result = match message {
            Outbound::Text(text) => writer.write_all(&encode_text(&text)).await,
            Outbound::Close => {
                let _ = writer.write_all(&encode_close()).await;
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(session_id = session_id, error = %e, "Control write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error as CrateError;
    use crate::protocol::frame::{decode_frame, encode_frame};
    use crate::protocol::constants::{OPCODE_BINARY, OPCODE_TEXT};
    use crate::protocol::{Dialect, EventPayload};
    use crate::server::handler::BoothEvent;
    use crate::stats::ServerStats;
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct Echo;

    impl EventHandler for Echo {
        async fn handle(
            &self,
            ctx: &EventContext,
            event: BoothEvent,
            payload: EventPayload,
        ) -> Result<()> {
            match event {
                BoothEvent::GetEffect => {
                    ctx.emit("current-effect", &json!({ "effect": "none" }));
                    Ok(())
                }
                BoothEvent::SetEffect => Err(CrateError::InvalidEffect(
                    payload.get("effect").unwrap_or_default().to_string(),
                )),
                _ => Ok(()),
            }
        }

        async fn http(&self, request: Request, stats: ServerStats) -> Response {
            Response::json(200, &json!({ "path": request.path, "active": stats.active_connections }))
        }
    }

    async fn spawn_server(dialect: Dialect) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(ServerConfig::default().dialect(dialect));
        let handler = Arc::new(Echo);
        let broadcaster = Arc::new(Broadcaster::new());
        let counters = Arc::new(ServerCounters::new());

        tokio::spawn(async move {
            let mut next_id = 1;
            loop {
                let (socket, peer) = listener.accept().await.unwrap();
                let conn = Connection::new(
                    next_id,
                    socket,
                    peer,
                    Arc::clone(&config),
                    Arc::clone(&handler),
                    Arc::clone(&broadcaster),
                    Arc::clone(&counters),
                );
                next_id += 1;
                tokio::spawn(conn.run());
            }
        });
        addr
    }

    struct Client {
        stream: TcpStream,
        buf: BytesMut,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(
                    b"GET /socket.io/?EIO=4&transport=websocket HTTP/1.1\r\n\
                      Host: localhost\r\n\
                      Upgrade: websocket\r\n\
                      Connection: Upgrade\r\n\
                      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                      Sec-WebSocket-Version: 13\r\n\r\n",
                )
                .await
                .unwrap();

            let mut buf = BytesMut::new();
            loop {
                stream.read_buf(&mut buf).await.unwrap();
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = buf.split_to(end + 4);
                    let head = String::from_utf8_lossy(&head);
                    assert!(head.starts_with("HTTP/1.1 101"));
                    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
                    break;
                }
            }
            Self { stream, buf }
        }

        async fn send(&mut self, text: &str) {
            let frame = encode_frame(OPCODE_TEXT, text.as_bytes(), Some([1, 2, 3, 4]));
            self.stream.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            loop {
                if let Some(frame) = decode_frame(&mut self.buf, 1 << 20).unwrap() {
                    if frame.is_close() {
                        return None;
                    }
                    return Some(frame.text().unwrap().to_string());
                }
                if self.stream.read_buf(&mut self.buf).await.unwrap() == 0 {
                    return None;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_socket_io_greeting_and_ping() {
        let addr = spawn_server(Dialect::SocketIo).await;
        let mut client = Client::connect(addr).await;

        let open = client.recv().await.unwrap();
        assert!(open.starts_with("0{"));
        let params: Value = serde_json::from_str(&open[1..]).unwrap();
        assert_eq!(params["sid"].as_str().unwrap().len(), 20);
        assert_eq!(params["pingInterval"], 25000);
        assert_eq!(client.recv().await.unwrap(), "40");

        client.send("2").await;
        assert_eq!(client.recv().await.unwrap(), "3");
        client.send("2probe").await;
        assert_eq!(client.recv().await.unwrap(), "3probe");
    }

    #[tokio::test]
    async fn test_socket_io_event_reply() {
        let addr = spawn_server(Dialect::SocketIo).await;
        let mut client = Client::connect(addr).await;
        client.recv().await.unwrap();
        client.recv().await.unwrap();

        client.send("40").await;
        client.send(r#"42["unknown-event",{}]"#).await;
        client.send(r#"42["get-effect"]"#).await;
        assert_eq!(
            client.recv().await.unwrap(),
            r#"42["current-effect",{"effect":"none"}]"#
        );
    }

    #[tokio::test]
    async fn test_handler_error_keeps_connection() {
        let addr = spawn_server(Dialect::Json).await;
        let mut client = Client::connect(addr).await;
        let greeting: Value = serde_json::from_str(&client.recv().await.unwrap()).unwrap();
        assert_eq!(greeting["event"], "connected");

        client
            .send(r#"{"event":"set-effect","data":{"effect":"swirl"}}"#)
            .await;
        let reply: Value = serde_json::from_str(&client.recv().await.unwrap()).unwrap();
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["error"], "invalid_effect");

        client.send(r#"{"event":"get-effect"}"#).await;
        let reply: Value = serde_json::from_str(&client.recv().await.unwrap()).unwrap();
        assert_eq!(reply["event"], "current-effect");
    }

    #[tokio::test]
    async fn test_binary_frame_terminates() {
        let addr = spawn_server(Dialect::Json).await;
        let mut client = Client::connect(addr).await;
        client.recv().await.unwrap();

        let frame = encode_frame(OPCODE_BINARY, b"\x00\x01", Some([9, 9, 9, 9]));
        client.stream.write_all(&frame).await.unwrap();
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_plain_http_request() {
        let addr = spawn_server(Dialect::Json).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);

        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("Access-Control-Allow-Origin: *"));
        assert!(text.ends_with(r#"{"active":0,"path":"/api/status"}"#));
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let addr = spawn_server(Dialect::Json).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"OPTIONS /api/identity HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);

        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS"));
        assert!(text.contains("Content-Length: 0"));
    }
}
