//! TCP relay for the change feed
//!
//! The relay owns a [`Hub`]. Clients subscribe to topics and receive
//! matching change events; events a client publishes go into the hub and
//! reach every matching subscription, the publisher's own included.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::hub::Hub;
use crate::protocol::Envelope;

/// Maximum number of connected clients
const MAX_CONNECTIONS: usize = 64;

/// Outbound frames buffered per connection
const OUTBOUND_CAPACITY: usize = 256;

/// Relay server handle
pub struct FeedServer {
    addr: SocketAddr,
    hub: Hub,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl FeedServer {
    /// Start relaying `hub` on the given port (0 picks a free port)
    pub async fn start(port: u16, hub: Hub) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Feed relay started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let connections = Arc::new(AtomicUsize::new(0));

        tokio::spawn(accept_loop(
            listener,
            hub.clone(),
            connections.clone(),
            shutdown_tx.clone(),
        ));

        Ok(FeedServer {
            addr: bound_addr,
            hub,
            connections,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and tell every client to go away
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Feed relay shutdown initiated");
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    hub: Hub,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            hub.clone(),
                            connections.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Hub,
    connections: Arc<AtomicUsize>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = stream.into_split();

    if connections.fetch_add(1, Ordering::SeqCst) >= MAX_CONNECTIONS {
        connections.fetch_sub(1, Ordering::SeqCst);
        warn!(addr = %addr, error = %Error::ServerFull, "Connection refused");
        let _ = write_frame(
            &mut writer,
            &Envelope::Rejected {
                reason: Error::ServerFull.to_string(),
            },
        )
        .await;
        return;
    }

    info!(addr = %addr, "Client connected");

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, out_rx));
    let mut forwarders: HashMap<u64, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(msg) => handle_message(msg, &hub, &out_tx, &mut forwarders).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(addr = %addr, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = out_tx.send(Envelope::ServerShutdown).await;
                break;
            }
        }
    }

    // Cleanup
    for (_, handle) in forwarders.drain() {
        handle.abort();
    }
    drop(out_tx);
    // Let the writer flush a pending ServerShutdown before the socket closes
    let _ = writer_handle.await;
    connections.fetch_sub(1, Ordering::SeqCst);

    info!(addr = %addr, "Client disconnected");
}

/// Handle an incoming message
async fn handle_message(
    msg: Envelope,
    hub: &Hub,
    out_tx: &mpsc::Sender<Envelope>,
    forwarders: &mut HashMap<u64, JoinHandle<()>>,
) {
    match msg {
        Envelope::Subscribe { sub_id, topic } => {
            let mut subscription = hub.subscribe(topic);
            let tx = out_tx.clone();
            let handle = tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if tx.send(Envelope::Change { sub_id, event }).await.is_err() {
                        break;
                    }
                }
            });
            if let Some(previous) = forwarders.insert(sub_id, handle) {
                previous.abort();
            }
            debug!(sub_id, ?topic, "Subscribed");
            let _ = out_tx.send(Envelope::Subscribed { sub_id }).await;
        }
        Envelope::Unsubscribe { sub_id } => {
            if let Some(handle) = forwarders.remove(&sub_id) {
                handle.abort();
                debug!(sub_id, "Unsubscribed");
            }
        }
        Envelope::Publish { event } => {
            debug!(table = ?event.table, kind = ?event.kind, "Relaying change");
            hub.publish(event);
        }
        Envelope::Ping => {
            let _ = out_tx.send(Envelope::Pong).await;
        }
        other => {
            debug!(msg = ?other, "Ignoring unexpected client message");
        }
    }
}

/// Writer task - sends messages to the client
async fn writer_task(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
        if matches!(msg, Envelope::ServerShutdown) {
            break;
        }
    }
}
