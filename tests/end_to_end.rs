//! Control channel, MJPEG port and HTTP API driven over real sockets
//!
//! The continuous capture tool is `sh -c "exec sleep 30"` (a process that
//! produces no frames and dies on SIGINT); photos come from a fake camera.
#![cfg(unix)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use booth_proxy::capture::CameraInfo;
use booth_proxy::protocol::constants::OPCODE_TEXT;
use booth_proxy::protocol::frame::{decode_frame, encode_frame};
use booth_proxy::{BoothHandler, BoothServer, Camera, CaptureConfig, Dialect, Result, ServerConfig};
use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const JPEG: [u8; 6] = [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];

struct FakeCamera;

impl Camera for FakeCamera {
    async fn detect(&self) -> Result<Vec<CameraInfo>> {
        Ok(vec![CameraInfo {
            model: "Canon".into(),
            port: "usb:001,004".into(),
        }])
    }

    async fn capture_image(&self, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, JPEG).await?;
        Ok(())
    }

    async fn capture_preview(&self, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, JPEG).await?;
        Ok(())
    }
}

struct Booth {
    server: Arc<BoothServer<BoothHandler<FakeCamera>>>,
    api: SocketAddr,
    mjpeg: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    running: tokio::task::JoinHandle<Result<()>>,
    _dir: tempfile::TempDir,
}

impl Booth {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let api = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mjpeg = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_addr = api.local_addr().unwrap();
        let mjpeg_addr = mjpeg.local_addr().unwrap();

        let config = ServerConfig::default()
            .api_addr(api_addr)
            .mjpeg_addr(mjpeg_addr)
            .public_host("127.0.0.1")
            .dialect(Dialect::Json)
            .base_dir(dir.path())
            .require_identity(true)
            .capture(
                CaptureConfig::default()
                    .program("sh")
                    .movie_args(["-c", "exec sleep 30"])
                    .settle_delay(Duration::from_millis(50))
                    .cooldown(Duration::from_millis(20))
                    .stop_grace(Duration::from_millis(500)),
            );

        let handler = BoothHandler::new(&config, FakeCamera);
        let server = Arc::new(BoothServer::new(config, handler));
        let (stop, stop_rx) = oneshot::channel::<()>();

        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .serve(api, Some(mjpeg), async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        Self {
            server,
            api: api_addr,
            mjpeg: mjpeg_addr,
            stop: Some(stop),
            running,
            _dir: dir,
        }
    }

    async fn wait_for_clients(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.server.broadcaster().count().await != n {
            assert!(tokio::time::Instant::now() < deadline, "clients never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let result = tokio::time::timeout(Duration::from_secs(5), self.running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
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
                b"GET / HTTP/1.1\r\n\
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
            assert!(stream.read_buf(&mut buf).await.unwrap() > 0);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = buf.split_to(end + 4);
                assert!(head.starts_with(b"HTTP/1.1 101"));
                break;
            }
        }

        let mut client = Self { stream, buf };
        let (event, data) = client.recv().await.unwrap();
        assert_eq!(event, "connected");
        assert!(data["sessionId"].is_string());
        client
    }

    async fn emit(&mut self, text: &str) {
        let frame = encode_frame(OPCODE_TEXT, text.as_bytes(), Some([9, 8, 7, 6]));
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Next event as (name, data); `None` once the server closes
    async fn recv(&mut self) -> Option<(String, Value)> {
        let read = async {
            loop {
                if let Some(frame) = decode_frame(&mut self.buf, 1 << 20).unwrap() {
                    if frame.is_close() {
                        return None;
                    }
                    let value: Value = serde_json::from_str(frame.text().unwrap()).unwrap();
                    return Some((
                        value["event"].as_str().unwrap().to_string(),
                        value["data"].clone(),
                    ));
                }
                if self.stream.read_buf(&mut self.buf).await.unwrap() == 0 {
                    return None;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), read)
            .await
            .expect("no event within 10s")
    }

    /// Skip events until `name` arrives
    async fn expect(&mut self, name: &str) -> Value {
        loop {
            match self.recv().await {
                Some((event, data)) if event == name => return data,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {}", name),
            }
        }
    }
}

async fn http(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let status = std::str::from_utf8(&out[9..12]).unwrap().parse().unwrap();
    (status, out[end + 4..].to_vec())
}

#[tokio::test]
async fn test_preview_then_capture() {
    let booth = Booth::start().await;
    let mut a = Client::connect(booth.api).await;
    let mut b = Client::connect(booth.api).await;
    booth.wait_for_clients(2).await;

    // Camera commands wait for a registered identity
    a.emit(r#"{"event":"capture-photo"}"#).await;
    let data = a.expect("photo-captured").await;
    assert_eq!(data["success"], false);
    assert_eq!(data["error"], "identity_required");

    let (status, body) = http(
        booth.api,
        "POST",
        "/api/identity",
        r#"{"booth_name":"Booth 7","location":{"lat":1.5,"lng":2.5}}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, br#"{"success":true}"#);

    // Preview over MJPEG
    a.emit(r#"{"event":"start-preview","data":{"fps":4}}"#).await;
    let started = a.expect("mjpeg-stream-started").await;
    assert_eq!(
        started["streamUrl"],
        format!("http://127.0.0.1:{}/camera", booth.mjpeg.port())
    );
    let preview = a.expect("preview-started").await;
    assert_eq!(preview["success"], true);
    assert_eq!(preview["mjpeg"], true);

    let mut viewer = TcpStream::connect(booth.mjpeg).await.unwrap();
    viewer.write_all(b"GET /camera HTTP/1.1\r\n\r\n").await.unwrap();
    let mut head = [0u8; 15];
    viewer.read_exact(&mut head).await.unwrap();
    assert_eq!(&head, b"HTTP/1.1 200 OK");

    let streams = Arc::clone(booth.server.handler().coordinator().streams());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while streams.client_count().await != 1 {
        assert!(tokio::time::Instant::now() < deadline, "viewer never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Capture stops the stream first and tells everyone
    a.emit(r#"{"event":"capture-photo"}"#).await;
    let stopped = a.recv().await.unwrap();
    assert_eq!(stopped.0, "mjpeg-stream-stopped");
    assert_eq!(stopped.1["success"], true);

    let captured = a.expect("photo-captured").await;
    assert_eq!(captured["success"], true);
    let filename = captured["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("photo_") && filename.ends_with(".jpg"));
    assert_eq!(captured["url"], format!("/uploads/{}", filename));

    let broadcast = a.expect("photoCaptured").await;
    assert_eq!(broadcast["filename"], filename.as_str());

    assert_eq!(b.expect("mjpeg-stream-stopped").await["success"], true);
    assert_eq!(b.expect("photoCaptured").await["filename"], filename.as_str());

    // The stopped stream closed the viewer
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), viewer.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();

    // The photo is listed and served
    let (status, body) = http(booth.api, "GET", "/api/photos", "").await;
    assert_eq!(status, 200);
    let photos: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(photos["photos"][0]["filename"], filename.as_str());

    let (status, body) = http(booth.api, "GET", &format!("/uploads/{}", filename), "").await;
    assert_eq!(status, 200);
    assert_eq!(body, JPEG);

    booth.shutdown().await;
    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
}

#[tokio::test]
async fn test_effects_are_shared() {
    let booth = Booth::start().await;
    let mut a = Client::connect(booth.api).await;
    let mut b = Client::connect(booth.api).await;
    booth.wait_for_clients(2).await;

    a.emit(r#"{"event":"set-effect","data":{"effect":"pixelate","params":{"pixelSize":4}}}"#)
        .await;
    let changed = a.expect("effect-changed").await;
    assert_eq!(changed["success"], true);
    assert_eq!(changed["pixelSize"], 4);

    let seen = b.expect("effectChanged").await;
    assert_eq!(seen["effect"], "pixelate");

    b.emit(r#"{"event":"get-effect"}"#).await;
    assert_eq!(b.expect("current-effect").await["effect"], "pixelate");

    // Unknown events are ignored and the connection stays usable
    a.emit(r#"{"event":"launch-rocket","data":{}}"#).await;
    a.emit(r#"{"event":"get-effect"}"#).await;
    assert_eq!(a.expect("current-effect").await["pixelSize"], 4);

    booth.shutdown().await;
}

#[tokio::test]
async fn test_http_api() {
    let booth = Booth::start().await;

    let (status, body) = http(booth.api, "GET", "/api/status", "").await;
    assert_eq!(status, 200);
    let status_body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status_body["cameraConnected"], true);
    assert_eq!(status_body["streaming"], false);

    let (status, body) = http(booth.api, "GET", "/api/identity", "").await;
    assert_eq!(status, 200);
    assert_eq!(body, br#"{"success":false}"#);

    let (status, _) = http(booth.api, "GET", "/uploads/..", "").await;
    assert_eq!(status, 403);

    let (status, body) = http(booth.api, "GET", "/missing", "").await;
    assert_eq!(status, 404);
    assert_eq!(body, br#"{"error":"Not Found"}"#);

    let (status, body) = http(booth.mjpeg, "GET", "/health", "").await;
    assert_eq!(status, 200);
    assert_eq!(body, br#"{"clients":0,"status":"ok","streaming":false}"#);

    booth.shutdown().await;
}
