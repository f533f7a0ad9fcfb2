//! Per-viewer state stored in the registry

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

/// Any byte sink a viewer can be served over
pub trait ViewerWriter: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> ViewerWriter for T {}

/// Registry-assigned viewer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Returned from [`ViewerRegistry::register`](super::ViewerRegistry::register)
///
/// `closed` resolves once the registry has dropped the viewer, whatever the
/// reason (write failure, explicit removal, stream stop).
#[derive(Debug)]
pub struct ViewerHandle {
    pub id: ViewerId,
    pub closed: oneshot::Receiver<()>,
}

pub(super) struct ViewerEntry {
    pub id: ViewerId,
    pub peer: Option<SocketAddr>,
    pub writer: Box<dyn ViewerWriter>,
    pub registered_at: Instant,
    pub frames_sent: u64,
    /// Dropped together with the entry, waking the handle's `closed`
    pub _closed_tx: oneshot::Sender<()>,
}

impl std::fmt::Debug for ViewerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerEntry")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}
