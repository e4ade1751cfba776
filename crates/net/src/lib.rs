//! Campus Feed Library
//!
//! Live change fan-out for the campus portal.
//!
//! # Architecture
//!
//! - **Hub**: In-process fan-out of change events to topic subscriptions
//! - **FeedServer**: Relays a hub over TCP so several processes share it
//! - **FeedClient**: Connects to a relay, reconnecting with backoff
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let hub = Hub::new();
//! let server = FeedServer::start(DEFAULT_PORT, hub.clone()).await?;
//!
//! let client = FeedClient::connect(addr).await?;
//! let mut sub = client.subscribe(Topic::messages_in(room_id)).await?;
//! while let Some(event) = sub.recv().await {
//!     store.apply(event);
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod hub;
pub mod protocol;
pub mod server;

pub use client::{ConnectionState, FeedClient};
pub use error::{Error, Result};
pub use hub::{Hub, Subscription};
pub use protocol::{ChangeEvent, EventKind, Filter, Row, Table, Topic};
pub use server::FeedServer;

/// Default port for the feed relay
pub const DEFAULT_PORT: u16 = 7441;
