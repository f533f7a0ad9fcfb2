//! Control session state and handler context

pub mod context;
pub mod state;

pub use context::EventContext;
pub use state::{SessionPhase, SessionState};
