//! Subject and study material catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    /// Course code, e.g. "CS101"
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(code: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            name,
            created_at: super::now(),
        }
    }
}

/// An uploaded file attached to a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub url: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Material {
    pub fn new(subject_id: Uuid, title: String, url: String, uploaded_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            title,
            url,
            uploaded_by,
            created_at: super::now(),
        }
    }
}
