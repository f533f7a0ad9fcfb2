//! Handler context
//!
//! Context passed to event handlers: who sent the event and how to answer.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;

use crate::server::broadcast::{Broadcaster, ReplySink};

/// Context passed to [`EventHandler`](crate::server::handler::EventHandler) callbacks
///
/// Replies go to the originating connection only; broadcasts go to every
/// open control connection, the sender included.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Envelope session id
    pub sid: String,

    reply: ReplySink,
    broadcaster: Arc<Broadcaster>,
}

impl EventContext {
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        sid: String,
        reply: ReplySink,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            sid,
            reply,
            broadcaster,
        }
    }

    /// Send an event to the originating connection
    pub fn emit(&self, event: &str, data: &Value) -> bool {
        self.reply.emit(event, data)
    }

    /// Send an event to every open connection
    pub async fn broadcast(&self, event: &str, data: &Value) -> usize {
        self.broadcaster.broadcast(event, data).await
    }

    /// Sink bound to the originating connection, for work that outlives the event
    pub fn reply(&self) -> &ReplySink {
        &self.reply
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}
