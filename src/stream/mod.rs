//! Live preview streaming
//!
//! - [`orchestrator`]: the single preview stream's start/stop state machine
//! - [`session`]: one capture process with its frame reader and error drain
//! - [`mjpeg`]: the HTTP endpoint viewers connect to

pub mod mjpeg;
pub mod orchestrator;
pub mod session;

pub use orchestrator::{StreamInfo, StreamPhase, StreamingOrchestrator};
pub use session::CaptureSession;
