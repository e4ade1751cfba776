//! Campus Portal client
//!
//! The client side of the campus chat: a thin async backend over the
//! core crate, the live change feed, a local cache that merges feed
//! events, and per-screen views (global lists, one room, one subject).

pub mod backend;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod state;
pub mod store;
pub mod terminal;
pub mod views;

pub use backend::Backend;
pub use config::{FeedConfig, PortalConfig};
pub use error::{ClientError, Result};
pub use network::FeedLinks;
pub use session::Session;
pub use state::{AppPaths, SessionFile};
pub use store::ClientStore;
pub use terminal::{Command, Portal};
