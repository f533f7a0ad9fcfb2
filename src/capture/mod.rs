//! External capture tool integration
//!
//! - [`process`]: the long-running movie capture child and its two-phase stop
//! - [`camera`]: single-shot commands (photo, preview frame, detection)

pub mod camera;
pub mod process;

pub use camera::{Camera, CameraInfo, ToolCamera};
pub use process::{CaptureCommand, CapturePipes, CaptureProcess, StopOutcome};
