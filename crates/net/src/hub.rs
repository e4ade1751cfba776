//! In-process change fan-out
//!
//! Every published event goes to one broadcast channel. Each subscription
//! runs a small forwarding task that keeps only events matching its topic,
//! so a room view never sees another room's messages.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{ChangeEvent, Topic};

/// Broadcast buffer shared by all subscribers
pub const HUB_CAPACITY: usize = 1024;

/// Per-subscription delivery buffer
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// Fan-out point for change events
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns how many forwarders saw it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Open a subscription for one topic.
    ///
    /// The broadcast receiver is taken before this returns, so an event
    /// published right after `subscribe` is never missed. Must be called
    /// from within a tokio runtime.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let mut events = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !topic.matches(&event) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(?topic, skipped, "Subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(?topic, "Forwarder finished");
        });

        Subscription::new(topic, rx, Closer::Task(forwarder))
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// What to do when a subscription is released
pub(crate) enum Closer {
    Task(JoinHandle<()>),
    Callback(Box<dyn FnOnce() + Send>),
}

/// A live subscription. Dropping it releases the subscription; no event is
/// delivered through it afterwards.
pub struct Subscription {
    topic: Topic,
    rx: mpsc::Receiver<ChangeEvent>,
    closer: Option<Closer>,
}

impl Subscription {
    pub(crate) fn new(topic: Topic, rx: mpsc::Receiver<ChangeEvent>, closer: Closer) -> Self {
        Self {
            topic,
            rx,
            closer: Some(closer),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event. `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        match self.closer.take() {
            Some(Closer::Task(handle)) => handle.abort(),
            Some(Closer::Callback(f)) => f(),
            None => {}
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Row, Table};
    use campus_core::{Message, Room, RoomKind};
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn message_event(room: &Room, text: &str) -> ChangeEvent {
        ChangeEvent::insert(Row::Message(Message::compose(
            room,
            Uuid::new_v4(),
            text.into(),
        )))
    }

    #[tokio::test]
    async fn test_room_subscription_sees_only_its_room() {
        let hub = Hub::new();
        let lounge = Room::new("Lounge".into(), RoomKind::Group);
        let other = Room::new("Other".into(), RoomKind::Group);

        let mut sub = hub.subscribe(Topic::messages_in(lounge.id));
        hub.publish(message_event(&other, "elsewhere"));
        hub.publish(message_event(&lounge, "here"));

        let event = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        match event.new {
            Some(Row::Message(m)) => assert_eq!(m.content, "here"),
            other => panic!("unexpected row: {:?}", other),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = Hub::new();
        let room = Room::new("Lounge".into(), RoomKind::Group);
        let mut sub = hub.subscribe(Topic::all(Table::Messages));

        for text in ["one", "two", "three"] {
            hub.publish(message_event(&room, text));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
            if let Some(Row::Message(m)) = event.new {
                seen.push(m.content);
            }
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_dropped_subscription_releases_forwarder() {
        let hub = Hub::new();
        let sub = hub.subscribe(Topic::all(Table::Rooms));
        assert_eq!(hub.subscriber_count(), 1);

        drop(sub);
        // Abort is processed on the next runtime tick
        for _ in 0..50 {
            if hub.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = Hub::new();
        let room = Room::new("Lounge".into(), RoomKind::Group);
        assert_eq!(hub.publish(ChangeEvent::insert(Row::Room(room))), 0);
    }
}
