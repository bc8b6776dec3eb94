// src/endpoint.rs

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMsg};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bridge::{Direction, LOCALHOST},
    error::Result,
};

type Peers = Arc<DashMap<Uuid, UnboundedSender<WsMsg>>>;

/// Local websocket server the flow's bridge config nodes connect to.
///
/// On the input side we push Kevoree messages to every connected peer. On the
/// output side every text frame a peer sends is handed to `forward`.
pub struct BridgeEndpoint {
    direction: Direction,
    local_addr: SocketAddr,
    peers: Peers,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
}

impl BridgeEndpoint {
    pub async fn bind(
        direction: Direction,
        port: u16,
        forward: Option<UnboundedSender<String>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((LOCALHOST, port)).await?;
        let local_addr = listener.local_addr()?;
        let peers: Peers = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            peers.clone(),
            forward,
            shutdown.clone(),
            tracker.clone(),
        ));
        info!(?direction, "bridge endpoint listening on ws://{local_addr}");

        Ok(Self {
            direction,
            local_addr,
            peers,
            shutdown,
            tracker,
            accept_task,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        peers: Peers,
        forward: Option<UnboundedSender<String>>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracker.spawn(Self::serve_peer(
                            stream,
                            peer,
                            peers.clone(),
                            forward.clone(),
                            shutdown.child_token(),
                        ));
                    }
                    Err(err) => warn!("endpoint accept failed: {err}"),
                }
            }
        }
    }

    async fn serve_peer(
        stream: TcpStream,
        peer: SocketAddr,
        peers: Peers,
        forward: Option<UnboundedSender<String>>,
        shutdown: CancellationToken,
    ) {
        let ws = tokio::select! {
            _ = shutdown.cancelled() => return,
            handshake = accept_async(stream) => match handshake {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(%peer, "websocket handshake failed: {err}");
                    return;
                }
            },
        };
        let (mut write, mut read) = ws.split();
        let (tx_out, mut rx_out) = unbounded_channel();
        let id = Uuid::new_v4();
        peers.insert(id, tx_out);
        debug!(%id, %peer, "bridge peer connected");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(WsMsg::Close(None)).await;
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMsg::Text(text))) => {
                        if let Some(forward) = &forward {
                            let _ = forward.send(text.as_str().to_string());
                        }
                    }
                    Some(Ok(WsMsg::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                outgoing = rx_out.recv() => match outgoing {
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        peers.remove(&id);
        debug!(%id, %peer, "bridge peer disconnected");
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Queue `text` for every connected peer. Returns how many got it.
    pub fn broadcast(&self, text: &str) -> usize {
        self.peers
            .iter()
            .filter(|peer| peer.value().send(WsMsg::Text(text.to_string().into())).is_ok())
            .count()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
        self.tracker.close();
        self.tracker.wait().await;
        self.peers.clear();
        debug!(direction = ?self.direction, "bridge endpoint closed");
    }
}
