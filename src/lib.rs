//! Photo booth camera proxy
//!
//! Drives a camera through an external capture tool (gphoto2 by default) and
//! serves it to browser clients on two ports:
//!
//! ```text
//!   capture tool stdout ──► FrameDemuxer ──► ViewerRegistry ──► GET /camera (MJPEG port)
//!
//!   WebSocket client ◄──► Connection ──► dispatch ──► EventHandler (BoothHandler)
//!   HTTP client      ◄──►    (API port)                  │
//!                                                        ▼
//!                                  CaptureCoordinator ──► StreamingOrchestrator
//! ```
//!
//! # Example
//!
//! ```no_run
//! use booth_proxy::{BoothHandler, BoothServer, ServerConfig, ToolCamera};
//!
//! # async fn run() -> booth_proxy::Result<()> {
//! let config = ServerConfig::default().require_identity(false);
//! let handler = BoothHandler::new(&config, ToolCamera::default());
//! let server = BoothServer::new(config, handler);
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod booth;
pub mod capture;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod stream;

pub use booth::BoothHandler;
pub use capture::{Camera, CameraInfo, ToolCamera};
pub use error::{Error, Result};
pub use protocol::Dialect;
pub use server::{BoothEvent, BoothServer, CaptureConfig, EventHandler, ServerConfig};
pub use session::EventContext;
