//! Locally persisted session record

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Profile;

/// What the client keeps on disk to restore a session across restarts.
///
/// `id` is kept as text so a corrupted or foreign record can be detected
/// and discarded instead of failing deserialization outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub credential: String,
    #[serde(default)]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl SessionRecord {
    /// Build a record for a resolved profile. `name` is the freshly supplied
    /// display name, which may differ from the stored one.
    pub fn for_profile(profile: &Profile, name: &str) -> Self {
        Self {
            id: profile.id.to_string(),
            name: name.to_string(),
            credential: profile.credential.clone(),
            avatar_ref: profile.avatar_ref.clone(),
            is_admin: profile.is_admin(),
        }
    }

    /// The identity id, if the record is well formed
    pub fn user_id(&self) -> Option<Uuid> {
        if self.name.trim().is_empty() || self.credential.trim().is_empty() {
            return None;
        }
        Uuid::parse_str(&self.id).ok()
    }
}
