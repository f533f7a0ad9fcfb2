//! Photo booth application layer
//!
//! - [`coordinator`]: serializes camera use between preview and photo capture
//! - [`handler`]: the control events and HTTP routes of a booth
//! - [`effects`], [`identity`], [`photos`]: bookkeeping the handler relies on

pub mod coordinator;
pub mod effects;
pub mod handler;
pub mod identity;
pub mod photos;

pub use coordinator::{CaptureCoordinator, CapturedPhoto, PhotoCapture, PreviewMode};
pub use effects::EffectSettings;
pub use handler::BoothHandler;
pub use identity::{IdentityRecord, IdentityStore};
pub use photos::PhotoEntry;
