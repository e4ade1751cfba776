//! Presence tracking
//!
//! The online flag is last-write-wins. Sessions that vanish without logging
//! out would leave it set forever, so readers combine it with the
//! `last_seen_at` heartbeat and a staleness threshold.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Profile;
use crate::storage::ProfileRepository;

/// How long a heartbeat keeps an online flag believable
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(120);

/// How often an active session refreshes its heartbeat
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

pub fn set_online<R: ProfileRepository + ?Sized>(repo: &R, user_id: Uuid, is_online: bool) -> Result<()> {
    debug!(user_id = %user_id, is_online, "Presence update");
    repo.set_online(user_id, is_online)
}

pub fn touch<R: ProfileRepository + ?Sized>(repo: &R, user_id: Uuid) -> Result<()> {
    repo.touch_last_seen(user_id)
}

/// Online flag set and a heartbeat seen within `staleness`
pub fn is_effectively_online(profile: &Profile, now: DateTime<Utc>, staleness: Duration) -> bool {
    if !profile.is_online {
        return false;
    }
    match profile.last_seen_at {
        Some(seen) => match (now - seen).to_std() {
            Ok(elapsed) => elapsed <= staleness,
            // Heartbeat from the future: clock skew between sessions
            Err(_) => true,
        },
        None => false,
    }
}
