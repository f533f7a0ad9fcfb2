//! Viewer registry implementation
//!
//! The set of MJPEG viewers currently receiving frames. One mutex guards the
//! whole set; it is held for a single register/remove or for one complete
//! broadcast loop, never across two frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};

use super::entry::{ViewerEntry, ViewerHandle, ViewerId, ViewerWriter};
use super::frame::Frame;
use crate::media::multipart::encode_part;

/// Default bound on a single viewer write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one [`ViewerRegistry::broadcast`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Viewers that received the frame
    pub delivered: usize,
    /// Viewers removed because the write failed or timed out
    pub dropped: usize,
}

/// Thread-safe set of active viewer connections
pub struct ViewerRegistry {
    viewers: Mutex<Vec<ViewerEntry>>,
    next_id: AtomicU64,
    write_timeout: Duration,
    frames_broadcast: AtomicU64,
    dropped_writes: AtomicU64,
}

impl ViewerRegistry {
    /// Create a registry with the default write timeout
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    /// Create a registry whose per-viewer writes give up after `write_timeout`
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            viewers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
            frames_broadcast: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
        }
    }

    /// Add a viewer
    ///
    /// Callers must have written the response preamble already; the registry
    /// only ever writes multipart parts.
    pub async fn register<W>(&self, writer: W, peer: Option<SocketAddr>) -> ViewerHandle
    where
        W: ViewerWriter + 'static,
    {
        let id = ViewerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (closed_tx, closed) = oneshot::channel();

        let mut viewers = self.viewers.lock().await;
        viewers.push(ViewerEntry {
            id,
            peer,
            writer: Box::new(writer),
            registered_at: Instant::now(),
            frames_sent: 0,
            _closed_tx: closed_tx,
        });

        tracing::info!(
            viewer = %id,
            peer = ?peer,
            viewers = viewers.len(),
            "Viewer registered"
        );

        ViewerHandle { id, closed }
    }

    /// Write `frame` to every viewer, pruning the ones that fail
    ///
    /// The multipart part is encoded once and the same bytes go to everyone.
    /// Failed viewers are removed after the loop and then shut down.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let part = encode_part(&frame.data);
        let mut report = BroadcastReport::default();

        let failed = {
            let mut viewers = self.viewers.lock().await;
            if viewers.is_empty() {
                return report;
            }

            let mut failed_ids = Vec::new();
            for entry in viewers.iter_mut() {
                let write = async {
                    entry.writer.write_all(&part).await?;
                    entry.writer.flush().await
                };

                match tokio::time::timeout(self.write_timeout, write).await {
                    Ok(Ok(())) => {
                        entry.frames_sent += 1;
                        report.delivered += 1;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(viewer = %entry.id, error = %e, "Viewer write failed");
                        failed_ids.push(entry.id);
                    }
                    Err(_) => {
                        tracing::debug!(viewer = %entry.id, "Viewer write timed out");
                        failed_ids.push(entry.id);
                    }
                }
            }

            let mut failed = Vec::with_capacity(failed_ids.len());
            if !failed_ids.is_empty() {
                let mut i = 0;
                while i < viewers.len() {
                    if failed_ids.contains(&viewers[i].id) {
                        failed.push(viewers.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
            failed
        };

        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);

        if !failed.is_empty() {
            report.dropped = failed.len();
            self.dropped_writes
                .fetch_add(failed.len() as u64, Ordering::Relaxed);

            for entry in failed {
                tracing::warn!(
                    viewer = %entry.id,
                    peer = ?entry.peer,
                    frames_sent = entry.frames_sent,
                    "Dropping viewer after failed write"
                );
                self.close_entry(entry).await;
            }
        }

        tracing::trace!(
            sequence = frame.sequence,
            bytes = frame.len(),
            delivered = report.delivered,
            "Frame broadcast"
        );

        report
    }

    /// Remove a viewer, closing its connection
    ///
    /// Returns false if the viewer was already gone.
    pub async fn remove(&self, id: ViewerId) -> bool {
        let entry = {
            let mut viewers = self.viewers.lock().await;
            match viewers.iter().position(|e| e.id == id) {
                Some(pos) => viewers.remove(pos),
                None => return false,
            }
        };

        tracing::debug!(
            viewer = %id,
            frames_sent = entry.frames_sent,
            connected_secs = entry.registered_at.elapsed().as_secs(),
            "Viewer removed"
        );
        self.close_entry(entry).await;
        true
    }

    /// Number of registered viewers
    pub async fn count(&self) -> usize {
        self.viewers.lock().await.len()
    }

    /// Whether `id` is still registered
    pub async fn contains(&self, id: ViewerId) -> bool {
        self.viewers.lock().await.iter().any(|e| e.id == id)
    }

    /// Remove and close every viewer, returning how many there were
    pub async fn close_all(&self) -> usize {
        let entries: Vec<ViewerEntry> = self.viewers.lock().await.drain(..).collect();
        let count = entries.len();

        for entry in entries {
            self.close_entry(entry).await;
        }

        if count > 0 {
            tracing::info!(viewers = count, "Closed all viewers");
        }
        count
    }

    /// Frames broadcast since creation
    pub fn frames_broadcast(&self) -> u64 {
        self.frames_broadcast.load(Ordering::Relaxed)
    }

    /// Viewers dropped after a failed write since creation
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    async fn close_entry(&self, mut entry: ViewerEntry) {
        let _ = tokio::time::timeout(self.write_timeout, entry.writer.shutdown()).await;
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::task::{Context, Poll};

    use bytes::Bytes;
    use tokio::io::AsyncWrite;

    /// Records every write attempt; fails on demand
    #[derive(Clone, Default)]
    struct MockViewer {
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        attempts: Arc<AtomicU64>,
        fail: Arc<AtomicBool>,
        shut_down: Arc<AtomicBool>,
    }

    impl MockViewer {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl AsyncWrite for MockViewer {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            self.writes.lock().unwrap().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// Never accepts a byte
    struct StalledViewer;

    impl AsyncWrite for StalledViewer {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Bytes::from(vec![0xFF, 0xD8, seq as u8, 0xFF, 0xD9]))
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let registry = ViewerRegistry::new();
        assert_eq!(registry.count().await, 0);

        let a = registry.register(MockViewer::default(), None).await;
        let b = registry.register(MockViewer::default(), None).await;

        assert_ne!(a.id, b.id);
        assert_eq!(registry.count().await, 2);
        assert!(registry.contains(a.id).await);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let registry = ViewerRegistry::new();
        let viewers: Vec<MockViewer> = (0..5).map(|_| MockViewer::default()).collect();
        for v in &viewers {
            registry.register(v.clone(), None).await;
        }

        let report = registry.broadcast(&frame(1)).await;
        assert_eq!(report, BroadcastReport { delivered: 5, dropped: 0 });

        let expected = encode_part(&frame(1).data).to_vec();
        for v in &viewers {
            assert_eq!(v.attempts.load(Ordering::SeqCst), 1);
            assert_eq!(v.writes(), vec![expected.clone()]);
        }
        assert_eq!(registry.frames_broadcast(), 1);
    }

    #[tokio::test]
    async fn test_failed_viewer_is_pruned() {
        let registry = ViewerRegistry::new();
        let viewers: Vec<MockViewer> = (0..4).map(|_| MockViewer::default()).collect();
        let mut handles = Vec::new();
        for v in &viewers {
            handles.push(registry.register(v.clone(), None).await);
        }

        viewers[1].fail.store(true, Ordering::SeqCst);
        let report = registry.broadcast(&frame(1)).await;
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 1 });
        assert_eq!(registry.count().await, 3);
        assert!(!registry.contains(handles[1].id).await);
        assert!(viewers[1].shut_down.load(Ordering::SeqCst));
        assert_eq!(registry.dropped_writes(), 1);

        // The failed viewer's handle observes the close
        let failed = handles.remove(1);
        assert!(failed.closed.await.is_err());

        let report = registry.broadcast(&frame(2)).await;
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 0 });

        assert_eq!(viewers[1].attempts.load(Ordering::SeqCst), 1);
        for i in [0, 2, 3] {
            let writes = viewers[i].writes();
            assert_eq!(writes.len(), 2);
            assert_eq!(writes[1], encode_part(&frame(2).data).to_vec());
        }
    }

    #[tokio::test]
    async fn test_stalled_viewer_times_out() {
        let registry = ViewerRegistry::with_write_timeout(Duration::from_millis(50));
        let healthy = MockViewer::default();
        registry.register(StalledViewer, None).await;
        registry.register(healthy.clone(), None).await;

        let report = registry.broadcast(&frame(1)).await;
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(registry.count().await, 1);
        assert_eq!(healthy.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_order() {
        let registry = ViewerRegistry::new();
        let viewer = MockViewer::default();
        registry.register(viewer.clone(), None).await;

        for seq in 1..=10 {
            registry.broadcast(&frame(seq)).await;
        }

        let expected: Vec<Vec<u8>> = (1..=10).map(|s| encode_part(&frame(s).data).to_vec()).collect();
        assert_eq!(viewer.writes(), expected);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ViewerRegistry::new();
        let viewer = MockViewer::default();
        let handle = registry.register(viewer.clone(), None).await;

        assert!(registry.remove(handle.id).await);
        assert!(!registry.remove(handle.id).await);
        assert_eq!(registry.count().await, 0);
        assert!(viewer.shut_down.load(Ordering::SeqCst));
        assert!(handle.closed.await.is_err());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ViewerRegistry::new();
        let viewers: Vec<MockViewer> = (0..3).map(|_| MockViewer::default()).collect();
        for v in &viewers {
            registry.register(v.clone(), None).await;
        }

        assert_eq!(registry.close_all().await, 3);
        assert_eq!(registry.count().await, 0);
        assert!(viewers.iter().all(|v| v.shut_down.load(Ordering::SeqCst)));

        // Empty registry: nothing written, nothing counted
        let report = registry.broadcast(&frame(1)).await;
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(registry.frames_broadcast(), 0);
    }
}
