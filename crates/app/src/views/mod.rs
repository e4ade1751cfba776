//! Views bound to a scope (a room, the whole portal, a subject)
//!
//! Each view owns its subscriptions; dropping the view tears them down, so
//! switching rooms can never leak events into a view that is gone.

mod global;
mod room;
mod subject;

pub use global::GlobalView;
pub use room::{RenderedMessage, RoomView};
pub use subject::SubjectView;
