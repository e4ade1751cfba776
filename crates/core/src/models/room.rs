//! Room model: group, anonymous and direct-message channels

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between the two identity ids of a dm key
pub const DM_KEY_SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Group,
    Dm,
    Anonymous,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Group => "group",
            RoomKind::Dm => "dm",
            RoomKind::Anonymous => "anonymous",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(RoomKind::Group),
            "dm" => Some(RoomKind::Dm),
            "anonymous" => Some(RoomKind::Anonymous),
            _ => None,
        }
    }

    /// Whether messages written into a room of this kind are stamped anonymous
    pub fn stamps_anonymous(self) -> bool {
        self == RoomKind::Anonymous
    }
}

/// Canonical direct-message key: the two participant ids in sorted order.
///
/// `DmKey::new(a, b)` and `DmKey::new(b, a)` are equal, which is what makes
/// dm room lookup idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DmKey {
    low: Uuid,
    high: Uuid,
}

impl DmKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        // Uuid ordering is byte order, which matches the lexicographic order
        // of the lowercase hyphenated text form
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id` (or `user_id` itself for a self-dm)
    pub fn other(&self, user_id: Uuid) -> Uuid {
        if self.low == user_id {
            self.high
        } else {
            self.low
        }
    }
}

impl fmt::Display for DmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.low, DM_KEY_SEPARATOR, self.high)
    }
}

impl FromStr for DmKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s.split_once(DM_KEY_SEPARATOR).unwrap_or((s, ""));
        Ok(DmKey::new(Uuid::parse_str(a)?, Uuid::parse_str(b)?))
    }
}

impl Serialize for DmKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DmKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A message channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub kind: RoomKind,
    pub subject_id: Option<Uuid>,
    /// Set only for dm rooms; indexed and unique in the store
    pub dm_key: Option<DmKey>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(name: String, kind: RoomKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            kind,
            subject_id: None,
            dm_key: None,
            created_at: super::now(),
        }
    }

    /// A dm room named after its canonical key
    pub fn direct(key: DmKey) -> Self {
        let mut room = Self::new(key.to_string(), RoomKind::Dm);
        room.dm_key = Some(key);
        room
    }

    pub fn with_subject(mut self, subject_id: Uuid) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == RoomKind::Anonymous
    }
}
