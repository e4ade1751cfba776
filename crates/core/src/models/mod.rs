//! Data models for the campus portal

mod catalog;
mod message;
mod notice;
mod profile;
mod room;
mod session;

pub use catalog::*;
pub use message::*;
pub use notice::*;
pub use profile::*;
pub use room::*;
pub use session::*;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision the store persists (microseconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
