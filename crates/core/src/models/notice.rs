//! Notice board model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An admin-managed announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(title: String, body: String, author_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            body,
            author_id,
            created_at: super::now(),
        }
    }
}
