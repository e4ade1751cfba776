//! Campus Core Library
//!
//! Models, storage, and the chat rules of the campus portal: identity
//! resolution, the room directory, message operations, presence and the
//! anonymity policy.

pub mod anonymity;
pub mod blobs;
pub mod board;
pub mod catalog;
pub mod directory;
pub mod error;
pub mod identity;
pub mod invariants;
pub mod messaging;
pub mod models;
pub mod presence;
pub mod storage;

pub use anonymity::{sender_label, should_reveal_sender, RevealToggle, GHOST_USER, UNKNOWN_SENDER};
pub use blobs::BlobStore;
pub use directory::{Lookup, SeedOutcome};
pub use error::{Error, Result};
pub use identity::{derive_profile_id, LoginPolicy};
pub use models::*;
pub use storage::{
    CatalogRepository, Database, MessageRepository, NoticeRepository, ProfileRepository,
    RoomRepository, Storage,
};
