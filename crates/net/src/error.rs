//! Change feed error types

use std::io;

/// Feed result type
pub type Result<T> = std::result::Result<T, Error>;

/// Feed errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Feed client is shut down")]
    NotConnected,

    #[error("Relay full")]
    ServerFull,
}
