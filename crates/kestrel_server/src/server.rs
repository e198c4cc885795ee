//! Coordinator protocol TCP server.
//!
//! Accepts connections, applies socket options, and hands each connection
//! to the framed transport with a shared channel handler.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use kestrel_common::types::ConnId;

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::dispatch::ChannelHandler;
use crate::registry::ConnectionRegistry;

/// The server state. Generic over the upper layer so tests can inject a
/// mock handler.
pub struct KestrelServer<H: ChannelHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    next_conn_id: AtomicU64,
    listener: TcpListener,
}

impl<H: ChannelHandler> KestrelServer<H> {
    /// Create the listening socket and bind it. Fails fast on a bad
    /// address or an unavailable port; these are startup errors.
    pub async fn bind(config: ServerConfig, handler: Arc<H>) -> io::Result<Self> {
        let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address '{}': {}", config.listen_addr, e),
            )
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_send_buffer_size(config.buffer_size as u32)?;
        socket.set_recv_buffer_size(config.buffer_size as u32)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.listen_backlog)?;
        tracing::info!("KestrelDTM listening on {}", listener.local_addr()?);

        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            config,
            handler,
            next_conn_id: AtomicU64::new(1),
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.registry.count()
    }

    /// Accept connections forever.
    pub async fn serve(&self) -> io::Result<()> {
        loop {
            self.accept_one().await;
        }
    }

    /// Accept connections until `shutdown` resolves, then wait up to
    /// `drain_timeout` for active connections to finish.
    pub async fn serve_with_shutdown(
        &self,
        shutdown: impl Future<Output = ()>,
        drain_timeout: Duration,
    ) -> io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = self.accept_one() => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping new connections");
                    break;
                }
            }
        }

        let active = self.registry.count();
        if active > 0 {
            tracing::info!(
                "Draining {} active connection(s) (timeout: {:?})",
                active,
                drain_timeout
            );
            let deadline = tokio::time::Instant::now() + drain_timeout;
            loop {
                let remaining = self.registry.count();
                if remaining == 0 {
                    tracing::info!("All connections drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(
                        "Drain timeout reached with {} connection(s) still active",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn accept_one(&self) {
        match self.listener.accept().await {
            Ok((stream, peer)) => {
                self.spawn_connection(stream, peer);
            }
            Err(e) => {
                // Accept failures at runtime are logged, not fatal; back
                // off briefly so fd exhaustion cannot spin the loop.
                tracing::error!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::SeqCst));
        if !self.registry.register(conn_id, peer) {
            tracing::warn!(
                "connection table full ({} active), rejecting {}",
                self.registry.count(),
                peer
            );
            return;
        }
        tracing::info!("New connection from {} (conn {})", peer, conn_id.0);

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("failed to set TCP_NODELAY on {}: {}", peer, e);
        }
        kestrel_observability::record_active_connections(self.registry.count());

        let handler = self.handler.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, conn_id, handler, &config).await {
                tracing::warn!("Connection error (conn {}): {}", conn_id.0, e);
            }
            registry.remove(conn_id);
            kestrel_observability::record_active_connections(registry.count());
            tracing::info!("Connection closed (conn {}, peer {})", conn_id.0, peer);
        });
    }
}
