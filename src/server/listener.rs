//! Booth server listener
//!
//! Runs the two accept loops: the control/API port and, when the handler
//! owns a preview stream, the MJPEG viewer port.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::server::broadcast::Broadcaster;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::handler::EventHandler;
use crate::stats::{ServerCounters, ServerStats};
use crate::stream::mjpeg::handle_viewer;

/// Photo booth server
pub struct BoothServer<H: EventHandler> {
    config: Arc<ServerConfig>,
    handler: Arc<H>,
    broadcaster: Arc<Broadcaster>,
    counters: Arc<ServerCounters>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<H: EventHandler> BoothServer<H> {
    /// Create a new server with the given configuration and handler
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self::with_handler(config, Arc::new(handler))
    }

    /// Create a server around a handler that is shared with other code
    pub fn with_handler(config: ServerConfig, handler: Arc<H>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            handler,
            broadcaster: Arc::new(Broadcaster::new()),
            counters: Arc::new(ServerCounters::new()),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Fan-out to every open control connection
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connection counters
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Run the server
    ///
    /// This method blocks until an accept loop fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let api = TcpListener::bind(self.config.api_addr).await?;
        let mjpeg = match self.handler.stream() {
            Some(_) => Some(TcpListener::bind(self.config.mjpeg_addr).await?),
            None => None,
        };
        self.serve(api, mjpeg, shutdown).await
    }

    /// Serve on already-bound listeners until `shutdown` completes
    ///
    /// On shutdown every control connection is sent a close frame and the
    /// handler's [`shutdown`](EventHandler::shutdown) runs, which stops any
    /// active stream.
    pub async fn serve<F>(
        &self,
        api: TcpListener,
        mjpeg: Option<TcpListener>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = api.local_addr() {
            tracing::info!(addr = %addr, dialect = ?self.config.dialect, "Control server listening");
        }
        if let Some(addr) = mjpeg.as_ref().and_then(|l| l.local_addr().ok()) {
            tracing::info!(addr = %addr, "MJPEG server listening");
        }

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&api) => result,
            result = self.mjpeg_loop(mjpeg.as_ref()) => result,
        };

        let closed = self.broadcaster.close_all().await;
        self.handler.shutdown().await;
        tracing::info!(connections = closed, "Server stopped");

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn mjpeg_loop(&self, listener: Option<&TcpListener>) -> Result<()> {
        let (Some(listener), Some(streams)) = (listener, self.handler.stream()) else {
            return std::future::pending().await;
        };

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    if let Err(e) = self.configure_socket(&socket) {
                        tracing::debug!(peer = %peer_addr, error = %e, "Failed to configure socket");
                    }
                    tokio::spawn(handle_viewer(
                        socket,
                        peer_addr,
                        Arc::clone(streams),
                        self.config.max_request_head,
                        self.config.connection_timeout,
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept MJPEG viewer");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.config),
            Arc::clone(&self.handler),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.counters),
        );
        let counters = Arc::clone(&self.counters);
        counters.connection_opened();

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            counters.connection_closed();
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Configured control/API address
    pub fn api_addr(&self) -> SocketAddr {
        self.config.api_addr
    }

    /// Configured MJPEG address
    pub fn mjpeg_addr(&self) -> SocketAddr {
        self.config.mjpeg_addr
    }
}
