// src/server.rs

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Receives every connection the server accepts.
///
/// The HTTP layer serving the flow editor plugs in here.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr);
}

/// Reads and discards until the peer hangs up.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainHandler;

#[async_trait]
impl ConnectionHandler for DrainHandler {
    async fn handle(&self, mut stream: TcpStream, _peer: SocketAddr) {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedConnection {
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
    close: CancellationToken,
}

/// Live connections keyed by a locally unique id.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, TrackedConnection>>,
}

impl ConnectionRegistry {
    fn open(&self, peer: SocketAddr, close: CancellationToken) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.insert(
            id,
            TrackedConnection {
                peer,
                accepted_at: Utc::now(),
                close,
            },
        );
        id
    }

    fn remove(&self, id: &Uuid) {
        self.inner.remove(id);
    }

    /// Force-close every tracked connection and forget them.
    fn close_all(&self) -> usize {
        let count = self.inner.len();
        for entry in self.inner.iter() {
            entry.value().close.cancel();
        }
        self.inner.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<TrackedConnection> {
        self.inner.get(id).map(|e| e.value().clone())
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.iter().map(|e| *e.key()).collect()
    }
}

/// The component's listening socket plus every connection it accepted.
pub struct BridgeServer {
    local_addr: SocketAddr,
    connections: ConnectionRegistry,
    stop_accepting: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<TcpListener>,
}

impl BridgeServer {
    pub async fn bind(addr: &str, handler: Arc<dyn ConnectionHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections = ConnectionRegistry::default();
        let stop_accepting = CancellationToken::new();
        let tracker = TaskTracker::new();

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            handler,
            connections.clone(),
            stop_accepting.clone(),
            tracker.clone(),
        ));

        Ok(Self {
            local_addr,
            connections,
            stop_accepting,
            tracker,
            accept_task,
        })
    }

    /// Accept until told to stop, then hand the listener back still open.
    async fn accept_loop(
        listener: TcpListener,
        handler: Arc<dyn ConnectionHandler>,
        connections: ConnectionRegistry,
        stop_accepting: CancellationToken,
        tracker: TaskTracker,
    ) -> TcpListener {
        loop {
            tokio::select! {
                _ = stop_accepting.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let close = CancellationToken::new();
                        let id = connections.open(peer, close.clone());
                        debug!(%id, %peer, "connection opened");

                        let handler = handler.clone();
                        let connections = connections.clone();
                        tracker.spawn(async move {
                            tokio::select! {
                                _ = close.cancelled() => debug!(%id, "connection force-closed"),
                                _ = handler.handle(stream, peer) => debug!(%id, "connection closed"),
                            }
                            connections.remove(&id);
                        });
                    }
                    Err(err) => warn!("accept failed: {err}"),
                }
            }
        }
        listener
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Stop accepting, force-close all connections, then close the socket.
    pub async fn shutdown(self) {
        self.stop_accepting.cancel();
        let listener = self.accept_task.await.ok();

        let closed = self.connections.close_all();
        self.tracker.close();
        self.tracker.wait().await;

        drop(listener);
        info!(closed, "server on {} closed", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{io::AsyncWriteExt, time::sleep};

    async fn wait_for(registry: &ConnectionRegistry, expected: usize) {
        for _ in 0..50 {
            if registry.len() == expected {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {expected} connections, have {}", registry.len());
    }

    #[tokio::test]
    async fn tracks_open_and_closed_connections() {
        let server = BridgeServer::bind("127.0.0.1:0", Arc::new(DrainHandler)).await.unwrap();
        let addr = server.local_addr();

        let mut first = TcpStream::connect(addr).await.unwrap();
        let second = TcpStream::connect(addr).await.unwrap();
        wait_for(server.connections(), 2).await;

        let ids = server.connections().ids();
        assert_ne!(ids[0], ids[1]);

        first.shutdown().await.unwrap();
        drop(first);
        wait_for(server.connections(), 1).await;

        drop(second);
        wait_for(server.connections(), 0).await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_force_closes_clients_and_socket() {
        let server = BridgeServer::bind("127.0.0.1:0", Arc::new(DrainHandler)).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for(server.connections(), 1).await;

        server.shutdown().await;

        let mut buf = [0u8; 8];
        let read = client.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)), "client should see the connection closed");
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
