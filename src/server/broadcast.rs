//! Outbound event delivery
//!
//! Every control connection owns a writer task fed by an unbounded channel.
//! [`ReplySink`] is the sending half bound to one connection; the
//! [`Broadcaster`] holds one sink per open connection for fan-out.
//!
//! ```text
//!   handler ──emit──► ReplySink ──mpsc──► writer task ──► socket
//!                         ▲
//!   broadcast() ──────────┴── one per open connection
//! ```

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::Dialect;

/// Message queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send as one text frame
    Text(String),
    /// Send a close frame and stop writing
    Close,
}

/// Sends events to one control connection
#[derive(Debug, Clone)]
pub struct ReplySink {
    conn_id: u64,
    dialect: Dialect,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ReplySink {
    pub fn new(conn_id: u64, dialect: Dialect, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            conn_id,
            dialect,
            tx,
        }
    }

    /// Queue a named event
    ///
    /// Returns `false` if the connection's writer has already gone away.
    pub fn emit(&self, event: &str, data: &Value) -> bool {
        self.send_raw(self.dialect.encode_event(event, data))
    }

    /// Queue an already-encoded envelope
    pub fn send_raw(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer to send a close frame
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether the writer task is still receiving
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Fan-out of events to every open control connection
#[derive(Debug, Default)]
pub struct Broadcaster {
    sinks: RwLock<HashMap<u64, ReplySink>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sink: ReplySink) {
        self.sinks.write().await.insert(sink.connection_id(), sink);
    }

    pub async fn unregister(&self, conn_id: u64) -> bool {
        self.sinks.write().await.remove(&conn_id).is_some()
    }

    /// Send `event` to every registered connection
    ///
    /// The envelope is encoded once per dialect in use. Returns the number of
    /// connections the event was queued for.
    pub async fn broadcast(&self, event: &str, data: &Value) -> usize {
        let sinks = self.sinks.read().await;
        let mut encoded: Vec<(Dialect, String)> = Vec::with_capacity(1);
        let mut delivered = 0;

        for sink in sinks.values() {
            let text = match encoded.iter().find(|(d, _)| *d == sink.dialect()) {
                Some((_, text)) => text.clone(),
                None => {
                    let text = sink.dialect().encode_event(event, data);
                    encoded.push((sink.dialect(), text.clone()));
                    text
                }
            };
            if sink.send_raw(text) {
                delivered += 1;
            }
        }

        tracing::debug!(event = event, delivered = delivered, "Broadcast event");
        delivered
    }

    /// Ask every connection's writer to send a close frame
    pub async fn close_all(&self) -> usize {
        let sinks = self.sinks.read().await;
        for sink in sinks.values() {
            sink.close();
        }
        sinks.len()
    }

    pub async fn count(&self) -> usize {
        self.sinks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink(id: u64, dialect: Dialect) -> (ReplySink, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ReplySink::new(id, dialect, tx), rx)
    }

    #[tokio::test]
    async fn test_emit_encodes_with_dialect() {
        let (sio, mut sio_rx) = sink(1, Dialect::SocketIo);
        let (plain, mut plain_rx) = sink(2, Dialect::Json);

        assert!(sio.emit("current-effect", &json!({"effect": "none"})));
        assert!(plain.emit("current-effect", &json!({"effect": "none"})));

        assert_eq!(
            sio_rx.recv().await,
            Some(Outbound::Text(r#"42["current-effect",{"effect":"none"}]"#.into()))
        );
        assert_eq!(
            plain_rx.recv().await,
            Some(Outbound::Text(
                r#"{"data":{"effect":"none"},"event":"current-effect"}"#.into()
            ))
        );
    }

    #[tokio::test]
    async fn test_emit_after_writer_gone() {
        let (sink, rx) = sink(1, Dialect::Json);
        drop(rx);
        assert!(!sink.is_open());
        assert!(!sink.emit("error", &json!({})));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all() {
        let broadcaster = Broadcaster::new();
        let (a, mut a_rx) = sink(1, Dialect::Json);
        let (b, mut b_rx) = sink(2, Dialect::Json);
        let (c, c_rx) = sink(3, Dialect::SocketIo);
        broadcaster.register(a).await;
        broadcaster.register(b).await;
        broadcaster.register(c).await;
        drop(c_rx);

        let delivered = broadcaster
            .broadcast("photoCaptured", &json!({"filename": "photo_1.jpg"}))
            .await;
        assert_eq!(delivered, 2);

        let expected = Outbound::Text(
            r#"{"data":{"filename":"photo_1.jpg"},"event":"photoCaptured"}"#.into(),
        );
        assert_eq!(a_rx.recv().await, Some(expected.clone()));
        assert_eq!(b_rx.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn test_unregister() {
        let broadcaster = Broadcaster::new();
        let (a, mut a_rx) = sink(7, Dialect::Json);
        broadcaster.register(a).await;
        assert_eq!(broadcaster.count().await, 1);

        assert!(broadcaster.unregister(7).await);
        assert!(!broadcaster.unregister(7).await);
        assert_eq!(broadcaster.broadcast("effectChanged", &json!({})).await, 0);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_all() {
        let broadcaster = Broadcaster::new();
        let (a, mut a_rx) = sink(1, Dialect::SocketIo);
        broadcaster.register(a).await;

        assert_eq!(broadcaster.close_all().await, 1);
        assert_eq!(a_rx.recv().await, Some(Outbound::Close));
    }
}
