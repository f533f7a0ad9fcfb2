//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::CaptureCommand;
use crate::media::demux::{DEFAULT_BUFFER_CAP, DEFAULT_RETAINED_TAIL};
use crate::protocol::constants::*;
use crate::protocol::Dialect;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control channel and HTTP API address
    pub api_addr: SocketAddr,

    /// MJPEG viewer address
    pub mjpeg_addr: SocketAddr,

    /// Host name placed in stream URLs handed to clients
    pub public_host: String,

    /// Maximum concurrent control connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// HTTP request head must arrive within this time
    pub connection_timeout: Duration,

    /// Disconnect a control client after this long without a frame (zero = never)
    pub idle_timeout: Duration,

    /// Largest accepted WebSocket payload
    pub max_payload: usize,

    /// Largest accepted HTTP request head
    pub max_request_head: usize,

    /// Largest accepted HTTP request body
    pub max_request_body: usize,

    /// Envelope dialect on the control channel
    pub dialect: Dialect,

    /// Engine.IO ping interval advertised to clients
    pub ping_interval: Duration,

    /// Engine.IO ping timeout advertised to clients
    pub ping_timeout: Duration,

    /// Where captured photos are written and served from
    pub uploads_dir: PathBuf,

    /// Where fallback preview frames are written
    pub previews_dir: PathBuf,

    /// Where the identity store lives
    pub data_dir: PathBuf,

    /// Refuse camera operations until a booth identity is registered
    pub require_identity: bool,

    /// Capture tool settings
    pub capture: CaptureConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            mjpeg_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_host: "localhost".to_string(),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            connection_timeout: Duration::from_secs(10),
            idle_timeout: Duration::ZERO,
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_request_head: DEFAULT_MAX_HEAD,
            max_request_body: DEFAULT_MAX_BODY,
            dialect: Dialect::SocketIo,
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            uploads_dir: PathBuf::from("uploads"),
            previews_dir: PathBuf::from("previews"),
            data_dir: PathBuf::from("data"),
            require_identity: true,
            capture: CaptureConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the control/API address
    pub fn api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = addr;
        self
    }

    /// Set the MJPEG address
    pub fn mjpeg_addr(mut self, addr: SocketAddr) -> Self {
        self.mjpeg_addr = addr;
        self
    }

    /// Set the host used in stream URLs
    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the envelope dialect
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Put uploads, previews and data under one root directory
    pub fn base_dir(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.uploads_dir = root.join("uploads");
        self.previews_dir = root.join("previews");
        self.data_dir = root.join("data");
        self
    }

    /// Set the uploads directory
    pub fn uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.uploads_dir = dir.into();
        self
    }

    /// Turn the identity requirement on or off
    pub fn require_identity(mut self, required: bool) -> Self {
        self.require_identity = required;
        self
    }

    /// Replace the capture settings
    pub fn capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Path of the identity store file
    pub fn identity_file(&self) -> PathBuf {
        self.data_dir.join("booth_identity.json")
    }
}

/// Capture tool settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture tool executable
    pub program: String,

    /// Arguments for continuous capture to stdout
    pub movie_args: Vec<String>,

    /// How long a stopped capture process may take to exit before SIGKILL
    pub stop_grace: Duration,

    /// How often exit is polled during the grace period
    pub stop_poll: Duration,

    /// Back-off after an empty or failed pipe read
    pub read_retry: Duration,

    /// Size of one pipe read
    pub read_chunk: usize,

    /// Demux buffer ceiling
    pub buffer_cap: usize,

    /// Demux bytes kept when the ceiling is exceeded
    pub retained_tail: usize,

    /// Pause after stopping the stream before the camera is used again
    pub settle_delay: Duration,

    /// Pause after a photo capture that interrupted the stream
    pub cooldown: Duration,

    /// Bound on a single viewer write
    pub viewer_write_timeout: Duration,

    /// Fallback preview rate when the client gives none
    pub default_preview_fps: u32,

    /// Number of fallback preview files kept on disk
    pub preview_keep: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "gphoto2".to_string(),
            movie_args: vec!["--stdout".to_string(), "--capture-movie".to_string()],
            stop_grace: Duration::from_millis(2000),
            stop_poll: Duration::from_millis(50),
            read_retry: Duration::from_millis(10),
            read_chunk: 64 * 1024,
            buffer_cap: DEFAULT_BUFFER_CAP,
            retained_tail: DEFAULT_RETAINED_TAIL,
            settle_delay: Duration::from_millis(500),
            cooldown: Duration::from_millis(250),
            viewer_write_timeout: Duration::from_secs(2),
            default_preview_fps: 4,
            preview_keep: 3,
        }
    }
}

impl CaptureConfig {
    /// Set the capture tool executable
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the continuous-capture arguments
    pub fn movie_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.movie_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the stop grace period
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Set the settle delay
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the post-capture cooldown
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Command line for continuous capture
    pub fn movie_command(&self) -> CaptureCommand {
        CaptureCommand::new(&self.program).args(&self.movie_args)
    }
}
