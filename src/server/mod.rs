//! Control server: listeners, connections, event dispatch

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use broadcast::{Broadcaster, Outbound, ReplySink};
pub use config::{CaptureConfig, ServerConfig};
pub use handler::{dispatch, BoothEvent, EventHandler};
pub use listener::BoothServer;
