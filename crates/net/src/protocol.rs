//! Change feed message types
//!
//! All wire messages are JSON-serialized and length-prefixed.

use campus_core::{Material, Message, Notice, Profile, Room};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tables that publish change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Profiles,
    Rooms,
    Messages,
    Notices,
    Materials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// A row image carried by a change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "lowercase")]
pub enum Row {
    Profile(Profile),
    Room(Room),
    Message(Message),
    Notice(Notice),
    Material(Material),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Profile(_) => Table::Profiles,
            Row::Room(_) => Table::Rooms,
            Row::Message(_) => Table::Messages,
            Row::Notice(_) => Table::Notices,
            Row::Material(_) => Table::Materials,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Row::Profile(p) => p.id,
            Row::Room(r) => r.id,
            Row::Message(m) => m.id,
            Row::Notice(n) => n.id,
            Row::Material(m) => m.id,
        }
    }
}

/// One discrete change to a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: EventKind,
    /// Row after the change (insert, update)
    pub new: Option<Row>,
    /// Row before the change (update when known, delete)
    pub old: Option<Row>,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            table: row.table(),
            kind: EventKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(new: Row, old: Option<Row>) -> Self {
        Self {
            table: new.table(),
            kind: EventKind::Update,
            new: Some(new),
            old,
        }
    }

    pub fn delete(old: Row) -> Self {
        Self {
            table: old.table(),
            kind: EventKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The most recent image of the affected row
    pub fn row(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Row filter narrowing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "column", content = "eq", rename_all = "snake_case")]
pub enum Filter {
    RoomId(Uuid),
    SubjectId(Uuid),
}

impl Filter {
    fn matches(&self, row: &Row) -> bool {
        match (self, row) {
            (Filter::RoomId(id), Row::Message(m)) => m.room_id == *id,
            (Filter::RoomId(id), Row::Room(r)) => r.id == *id,
            (Filter::SubjectId(id), Row::Material(m)) => m.subject_id == *id,
            (Filter::SubjectId(id), Row::Room(r)) => r.subject_id == Some(*id),
            _ => false,
        }
    }
}

/// What a subscriber listens to: a table, optionally narrowed by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub table: Table,
    pub filter: Option<Filter>,
}

impl Topic {
    pub fn all(table: Table) -> Self {
        Self { table, filter: None }
    }

    pub fn messages_in(room_id: Uuid) -> Self {
        Self {
            table: Table::Messages,
            filter: Some(Filter::RoomId(room_id)),
        }
    }

    pub fn materials_of(subject_id: Uuid) -> Self {
        Self {
            table: Table::Materials,
            filter: Some(Filter::SubjectId(subject_id)),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        match (&self.filter, event.row()) {
            (None, _) => true,
            (Some(filter), Some(row)) => filter.matches(row),
            (Some(_), None) => false,
        }
    }
}

/// Relay protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Client opens a subscription
    Subscribe { sub_id: u64, topic: Topic },

    /// Server confirms a subscription
    Subscribed { sub_id: u64 },

    /// Client closes a subscription
    Unsubscribe { sub_id: u64 },

    /// Client publishes a change made against the shared store
    Publish { event: ChangeEvent },

    /// Server delivers a change to one subscription
    Change { sub_id: u64, event: ChangeEvent },

    /// Server refuses the connection
    Rejected { reason: String },

    /// Keepalive
    Ping,

    Pong,

    /// Server is shutting down
    ServerShutdown,
}

impl Envelope {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::RoomKind;

    fn message_in(room: &Room) -> Message {
        Message::compose(room, Uuid::new_v4(), "hello".into())
    }

    #[test]
    fn test_room_filter() {
        let lounge = Room::new("Lounge".into(), RoomKind::Group);
        let other = Room::new("Other".into(), RoomKind::Group);
        let topic = Topic::messages_in(lounge.id);

        assert!(topic.matches(&ChangeEvent::insert(Row::Message(message_in(&lounge)))));
        assert!(!topic.matches(&ChangeEvent::insert(Row::Message(message_in(&other)))));
        assert!(topic.matches(&ChangeEvent::delete(Row::Message(message_in(&lounge)))));
        assert!(!topic.matches(&ChangeEvent::insert(Row::Room(other))));
    }

    #[test]
    fn test_unfiltered_topic_matches_table_only() {
        let room = Room::new("Lounge".into(), RoomKind::Group);
        let topic = Topic::all(Table::Rooms);
        assert!(topic.matches(&ChangeEvent::insert(Row::Room(room.clone()))));
        assert!(!topic.matches(&ChangeEvent::insert(Row::Message(message_in(&room)))));
    }

    #[test]
    fn test_change_envelope_roundtrip() {
        let room = Room::new("Confessions".into(), RoomKind::Anonymous);
        let msg = message_in(&room);
        let env = Envelope::Change {
            sub_id: 7,
            event: ChangeEvent::insert(Row::Message(msg.clone())),
        };

        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        match decoded {
            Envelope::Change { sub_id, event } => {
                assert_eq!(sub_id, 7);
                assert_eq!(event.kind, EventKind::Insert);
                assert_eq!(event.new, Some(Row::Message(msg)));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }
}
