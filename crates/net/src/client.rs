//! TCP client for a feed relay
//!
//! One connection carries any number of subscriptions, multiplexed by
//! `sub_id`. When the relay goes away the client keeps trying with backoff
//! and, once back, re-sends every live subscription and any changes that
//! were published while offline.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::hub::{Closer, Subscription, SUBSCRIPTION_CAPACITY};
use crate::protocol::{ChangeEvent, Envelope, Topic};

/// Backoff between reconnect attempts; the last entry repeats
pub const RECONNECT_DELAYS_MS: &[u64] = &[1000, 2000, 5000, 10000, 30000];

/// Ping interval while connected
const HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Relay is considered dead if nothing arrives for this long
const RELAY_DEAD_TIMEOUT_MS: u64 = 15000;

/// Changes held while offline; oldest are dropped first
const MAX_PENDING_PUBLISHES: usize = 256;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Lost the relay, retrying with backoff
    Reconnecting,
    /// Shut down; no further deliveries
    Closed,
}

struct ClientState {
    connection: ConnectionState,
    reconnects: u64,
}

enum ClientCommand {
    Subscribe {
        sub_id: u64,
        topic: Topic,
        tx: mpsc::Sender<ChangeEvent>,
    },
    Unsubscribe {
        sub_id: u64,
    },
    Publish(ChangeEvent),
    Shutdown,
}

/// Client handle for a feed relay
pub struct FeedClient {
    addr: SocketAddr,
    state: Arc<RwLock<ClientState>>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    next_sub_id: AtomicU64,
}

impl FeedClient {
    /// Connect to a relay. The first connection must succeed; later
    /// drops are retried in the background.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        info!(addr = %addr, "Connecting to feed relay");

        let stream = TcpStream::connect(addr).await?;

        let state = Arc::new(RwLock::new(ClientState {
            connection: ConnectionState::Connected,
            reconnects: 0,
        }));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(addr, stream, state.clone(), cmd_rx));

        Ok(FeedClient {
            addr,
            state,
            cmd_tx,
            next_sub_id: AtomicU64::new(1),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Subscribe to a topic on the relay
    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        self.cmd_tx
            .send(ClientCommand::Subscribe { sub_id, topic, tx })
            .await
            .map_err(|_| Error::NotConnected)?;

        let cmd_tx = self.cmd_tx.clone();
        let closer = Closer::Callback(Box::new(move || {
            // A full queue is fine: the task drops the sub when delivery fails
            let _ = cmd_tx.try_send(ClientCommand::Unsubscribe { sub_id });
        }));

        Ok(Subscription::new(topic, rx, closer))
    }

    /// Publish a change to every subscriber of the relay
    pub async fn publish(&self, event: ChangeEvent) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Publish(event))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Number of successful reconnects since `connect`
    pub async fn reconnect_count(&self) -> u64 {
        self.state.read().await.reconnects
    }

    /// Close the connection and stop reconnecting
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Shutdown).await;
    }
}

struct Subscriber {
    topic: Topic,
    tx: mpsc::Sender<ChangeEvent>,
}

/// Survives reconnects
#[derive(Default)]
struct Session {
    subs: HashMap<u64, Subscriber>,
    pending: VecDeque<ChangeEvent>,
}

impl Session {
    fn queue(&mut self, event: ChangeEvent) {
        if self.pending.len() >= MAX_PENDING_PUBLISHES {
            self.pending.pop_front();
            warn!("Offline queue full, dropping oldest change");
        }
        self.pending.push_back(event);
    }

    /// Apply a command while no connection exists. Returns false on shutdown.
    fn apply_offline(&mut self, cmd: Option<ClientCommand>) -> bool {
        match cmd {
            Some(ClientCommand::Subscribe { sub_id, topic, tx }) => {
                self.subs.insert(sub_id, Subscriber { topic, tx });
            }
            Some(ClientCommand::Unsubscribe { sub_id }) => {
                self.subs.remove(&sub_id);
            }
            Some(ClientCommand::Publish(event)) => self.queue(event),
            Some(ClientCommand::Shutdown) | None => return false,
        }
        true
    }
}

enum Ended {
    Lost,
    Shutdown,
}

/// Main connection task
async fn connection_task(
    addr: SocketAddr,
    stream: TcpStream,
    state: Arc<RwLock<ClientState>>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let mut session = Session::default();
    let mut next = Some(stream);

    loop {
        let stream = match next.take() {
            Some(stream) => stream,
            None => match reconnect(addr, &state, &mut cmd_rx, &mut session).await {
                Some(stream) => stream,
                None => break,
            },
        };

        state.write().await.connection = ConnectionState::Connected;

        match run_connection(stream, &mut cmd_rx, &mut session).await {
            Ended::Shutdown => break,
            Ended::Lost => {
                state.write().await.connection = ConnectionState::Reconnecting;
                warn!(addr = %addr, "Feed connection lost");
            }
        }
    }

    cmd_rx.close();
    state.write().await.connection = ConnectionState::Closed;
    info!(addr = %addr, "Feed client closed");
}

/// Retry with backoff until connected. `None` means shutdown was requested.
async fn reconnect(
    addr: SocketAddr,
    state: &Arc<RwLock<ClientState>>,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    session: &mut Session,
) -> Option<TcpStream> {
    let mut attempt = 0usize;

    loop {
        let delay_idx = attempt.min(RECONNECT_DELAYS_MS.len() - 1);
        let delay_ms = RECONNECT_DELAYS_MS[delay_idx];
        info!(delay_ms = delay_ms, "Reconnect backoff");

        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => {
                    if !session.apply_offline(cmd) {
                        info!("Reconnect loop cancelled");
                        return None;
                    }
                }
            }
        }

        info!(attempt = attempt + 1, "Reconnect attempt");
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                state.write().await.reconnects += 1;
                info!(addr = %addr, "Reconnected to feed relay");
                return Some(stream);
            }
            Err(e) => {
                debug!(error = %e, "Connection attempt failed");
            }
        }

        attempt += 1;
    }
}

async fn run_connection(
    stream: TcpStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    session: &mut Session,
) -> Ended {
    let (reader, mut writer) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let reader_handle = tokio::spawn(reader_task(reader, frame_tx));

    let ended = drive(&mut writer, &mut frame_rx, cmd_rx, session).await;

    reader_handle.abort();
    ended
}

/// Reads frames off the socket so the main loop never cancels a partial read
async fn reader_task(mut reader: OwnedReadHalf, tx: mpsc::Sender<Result<Envelope>>) {
    loop {
        let frame = read_frame(&mut reader).await;
        let failed = frame.is_err();
        if tx.send(frame).await.is_err() || failed {
            break;
        }
    }
}

async fn drive(
    writer: &mut OwnedWriteHalf,
    frame_rx: &mut mpsc::Receiver<Result<Envelope>>,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    session: &mut Session,
) -> Ended {
    // Restore subscriptions, then flush what was published while offline
    let restore: Vec<Envelope> = session
        .subs
        .iter()
        .map(|(sub_id, sub)| Envelope::Subscribe {
            sub_id: *sub_id,
            topic: sub.topic,
        })
        .collect();
    for msg in &restore {
        if write_frame(writer, msg).await.is_err() {
            return Ended::Lost;
        }
    }
    while let Some(event) = session.pending.pop_front() {
        let msg = Envelope::Publish { event };
        if write_frame(writer, &msg).await.is_err() {
            if let Envelope::Publish { event } = msg {
                session.pending.push_front(event);
            }
            return Ended::Lost;
        }
    }

    let mut heartbeat = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            // Incoming message from relay
            frame = frame_rx.recv() => {
                match frame {
                    Some(Ok(msg)) => {
                        last_frame = Instant::now();
                        if let Some(ended) = handle_relay_message(msg, writer, session).await {
                            return ended;
                        }
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Relay closed connection");
                        return Ended::Lost;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        return Ended::Lost;
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Subscribe { sub_id, topic, tx }) => {
                        session.subs.insert(sub_id, Subscriber { topic, tx });
                        if write_frame(writer, &Envelope::Subscribe { sub_id, topic }).await.is_err() {
                            return Ended::Lost;
                        }
                    }
                    Some(ClientCommand::Unsubscribe { sub_id }) => {
                        if session.subs.remove(&sub_id).is_some()
                            && write_frame(writer, &Envelope::Unsubscribe { sub_id }).await.is_err()
                        {
                            return Ended::Lost;
                        }
                    }
                    Some(ClientCommand::Publish(event)) => {
                        let msg = Envelope::Publish { event };
                        if let Err(e) = write_frame(writer, &msg).await {
                            warn!(error = %e, "Write error, change queued");
                            if let Envelope::Publish { event } = msg {
                                session.queue(event);
                            }
                            return Ended::Lost;
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        debug!("Shutdown requested");
                        return Ended::Shutdown;
                    }
                }
            }

            // Heartbeat watchdog
            _ = heartbeat.tick() => {
                let elapsed = last_frame.elapsed();
                if elapsed > Duration::from_millis(RELAY_DEAD_TIMEOUT_MS) {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "Relay appears dead");
                    return Ended::Lost;
                }
                if write_frame(writer, &Envelope::Ping).await.is_err() {
                    return Ended::Lost;
                }
            }
        }
    }
}

/// Handle a message from the relay
async fn handle_relay_message(
    msg: Envelope,
    writer: &mut OwnedWriteHalf,
    session: &mut Session,
) -> Option<Ended> {
    match msg {
        Envelope::Change { sub_id, event } => {
            let delivered = match session.subs.get(&sub_id) {
                Some(sub) => sub.tx.send(event).await.is_ok(),
                None => {
                    debug!(sub_id, "Change for unknown subscription");
                    return None;
                }
            };
            if !delivered {
                // Receiver is gone; the Unsubscribe from its drop may have been lost
                session.subs.remove(&sub_id);
                if write_frame(writer, &Envelope::Unsubscribe { sub_id }).await.is_err() {
                    return Some(Ended::Lost);
                }
            }
            None
        }
        Envelope::Subscribed { sub_id } => {
            debug!(sub_id, "Subscription confirmed");
            None
        }
        Envelope::Pong => None,
        Envelope::ServerShutdown => {
            info!("Relay is shutting down");
            Some(Ended::Lost)
        }
        Envelope::Rejected { reason } => {
            warn!(error = %Error::Rejected(reason), "Relay refused connection");
            Some(Ended::Lost)
        }
        other => {
            debug!(msg = ?other, "Ignoring unexpected relay message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::protocol::{Row, Table};
    use crate::server::FeedServer;
    use campus_core::{Message, Room, RoomKind};
    use tokio::time::timeout;
    use uuid::Uuid;

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached in time");
    }

    fn local(server: &FeedServer) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], server.addr().port()))
    }

    fn message_event(room: &Room, text: &str) -> ChangeEvent {
        ChangeEvent::insert(Row::Message(Message::compose(
            room,
            Uuid::new_v4(),
            text.into(),
        )))
    }

    #[tokio::test]
    async fn test_subscription_receives_relayed_change() {
        let hub = Hub::new();
        let server = FeedServer::start(0, hub.clone()).await.unwrap();
        let client = FeedClient::connect(local(&server)).await.unwrap();
        let room = Room::new("Lounge".into(), RoomKind::Group);

        let mut sub = client.subscribe(Topic::messages_in(room.id)).await.unwrap();
        wait_until(|| hub.subscriber_count() == 1).await;

        hub.publish(message_event(&room, "hello"));

        let event = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        assert_eq!(event.table, Table::Messages);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_publisher_sees_own_change() {
        let hub = Hub::new();
        let server = FeedServer::start(0, hub.clone()).await.unwrap();
        let alice = FeedClient::connect(local(&server)).await.unwrap();
        let bob = FeedClient::connect(local(&server)).await.unwrap();
        let room = Room::new("Lounge".into(), RoomKind::Group);

        let mut alice_sub = alice.subscribe(Topic::messages_in(room.id)).await.unwrap();
        let mut bob_sub = bob.subscribe(Topic::messages_in(room.id)).await.unwrap();
        wait_until(|| hub.subscriber_count() == 2).await;

        let event = message_event(&room, "from alice");
        alice.publish(event.clone()).await.unwrap();

        let echoed = timeout(Duration::from_secs(5), alice_sub.recv()).await.unwrap().unwrap();
        let delivered = timeout(Duration::from_secs(5), bob_sub.recv()).await.unwrap().unwrap();
        assert_eq!(echoed, event);
        assert_eq!(delivered, event);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_released_on_relay() {
        let hub = Hub::new();
        let server = FeedServer::start(0, hub.clone()).await.unwrap();
        let client = FeedClient::connect(local(&server)).await.unwrap();

        let sub = client.subscribe(Topic::all(Table::Rooms)).await.unwrap();
        wait_until(|| hub.subscriber_count() == 1).await;

        drop(sub);
        wait_until(|| hub.subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn test_reconnect_restores_subscriptions() {
        let first = FeedServer::start(0, Hub::new()).await.unwrap();
        let addr = local(&first);
        let client = FeedClient::connect(addr).await.unwrap();
        let room = Room::new("Lounge".into(), RoomKind::Group);
        let mut sub = client.subscribe(Topic::messages_in(room.id)).await.unwrap();
        wait_until(|| first.hub().subscriber_count() == 1).await;

        first.shutdown();
        drop(first);
        for _ in 0..100 {
            if client.connection_state().await == ConnectionState::Reconnecting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(client.connection_state().await, ConnectionState::Reconnecting);

        // Relay comes back on the same port
        let hub = Hub::new();
        let _second = FeedServer::start(addr.port(), hub.clone()).await.unwrap();
        wait_until(|| hub.subscriber_count() == 1).await;

        hub.publish(message_event(&room, "after reconnect"));
        let event = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        match event.new {
            Some(Row::Message(m)) => assert_eq!(m.content, "after reconnect"),
            other => panic!("unexpected row: {:?}", other),
        }
        assert_eq!(client.reconnect_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let server = FeedServer::start(0, Hub::new()).await.unwrap();
        let client = FeedClient::connect(local(&server)).await.unwrap();
        client.shutdown().await;

        for _ in 0..100 {
            if client.connection_state().await == ConnectionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let room = Room::new("Lounge".into(), RoomKind::Group);
        let result = client.publish(message_event(&room, "late")).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
