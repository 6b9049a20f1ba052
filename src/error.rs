//! Error types for every layer of the session core.
//!
//! Partial failures (one corrupt directory record, one unknown inbound event)
//! never surface here as fatal: they are logged where they happen and the
//! operation continues.  The variants below are the failures a caller is
//! expected to act on.

use thiserror::Error;

/// Failure reported by a [`DirectoryStore`](crate::directory::DirectoryStore)
/// implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("directory store unreachable: {0}")]
    Unreachable(String),

    #[error("directory store command failed: {0}")]
    Command(String),

    #[error("directory store not connected")]
    NotConnected,
}

/// Failure reported by a [`Channel`](crate::session::Channel) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("transport send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The store could not be reached within the retry budget.
    #[error("world directory unavailable after {attempts} attempt(s)")]
    Unavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("invalid world record at '{key}'")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Boundary decoding failure for an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown server event '{0}'")]
    UnknownEvent(String),

    #[error("invalid payload for '{event}'")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode '{command}'")]
    Encode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("session is already {0}")]
    AlreadyConnected(crate::types::ConnectionState),

    /// The attempt was abandoned by an explicit disconnect.
    #[error("connect attempt cancelled")]
    Cancelled,

    #[error("connection lost after {attempts} reconnect attempt(s)")]
    ConnectionLost { attempts: u32 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("world '{0}' not found in directory")]
    UnknownWorld(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}
