//! Chat message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Room;

/// A chat message in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    /// Weak reference; the sender profile may no longer exist
    pub sender_id: Uuid,
    pub content: String,
    /// Fixed when the message is composed, never recomputed from the room
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Compose a message for `room`, stamping the anonymous flag from the
    /// room's kind as it is right now.
    pub fn compose(room: &Room, sender_id: Uuid, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id: room.id,
            sender_id,
            content,
            is_anonymous: room.kind.stamps_anonymous(),
            created_at: super::now(),
        }
    }

    /// Sort key giving a total, stable display order
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// Message joined with whatever is known about its sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDisplay {
    pub message: Message,
    pub sender_name: Option<String>,
    pub sender_credential: Option<String>,
}

impl MessageDisplay {
    pub fn new(message: Message, sender_name: Option<String>, sender_credential: Option<String>) -> Self {
        Self {
            message,
            sender_name,
            sender_credential,
        }
    }
}
