//! User identity model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Portal-wide role of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The stable record representing one logged-in person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    /// Phone number or student id; unique across profiles
    pub credential: String,
    pub role: Role,
    pub is_online: bool,
    /// Refreshed by presence heartbeats
    pub last_seen_at: Option<DateTime<Utc>>,
    pub avatar_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: Uuid, name: String, credential: String, role: Role) -> Self {
        Self {
            id,
            name,
            credential,
            role,
            is_online: false,
            last_seen_at: None,
            avatar_ref: None,
            created_at: super::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
