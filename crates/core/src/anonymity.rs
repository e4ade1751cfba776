//! Anonymity policy
//!
//! Masking is purely a display decision: stored content and sender ids are
//! never altered, so admins keep full audit capability.

use crate::error::{Error, Result};
use crate::models::{Message, MessageDisplay, Room};

/// Placeholder shown instead of the sender of an anonymous message
pub const GHOST_USER: &str = "Ghost User";

/// Label for senders whose profile no longer exists
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Whether the true sender of `message` may be shown to this viewer
pub fn should_reveal_sender(message: &Message, viewer_is_admin: bool, reveal_toggle_on: bool) -> bool {
    !message.is_anonymous || (viewer_is_admin && reveal_toggle_on)
}

/// The sender label to render for a message
pub fn sender_label(display: &MessageDisplay, viewer_is_admin: bool, reveal_toggle_on: bool) -> String {
    if !should_reveal_sender(&display.message, viewer_is_admin, reveal_toggle_on) {
        return GHOST_USER.to_string();
    }
    display
        .sender_name
        .clone()
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
}

/// Room-scoped, ephemeral reveal switch. Starts off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevealToggle {
    on: bool,
}

impl RevealToggle {
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Flip the toggle. Only admins may, and only in anonymous rooms.
    pub fn toggle(&mut self, viewer_is_admin: bool, room: &Room) -> Result<bool> {
        if !viewer_is_admin {
            return Err(Error::PermissionDenied("only admins can reveal senders".into()));
        }
        if !room.is_anonymous() {
            return Err(Error::InvalidOperation(
                "reveal applies to anonymous rooms only".into(),
            ));
        }
        self.on = !self.on;
        Ok(self.on)
    }
}
