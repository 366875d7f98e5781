//! # Error Types
//!
//! Typed failures for the relay. Each kind maps to one containment scope:
//!
//! - [`ProtocolError`]: one inbound message is dropped
//! - [`Rejection`]: one command is ignored, nobody is disconnected
//! - [`RelayError`]: I/O on one connection failed, that connection is purged

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

/// Why an inbound message could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("message too large: {len} bytes (max: {max} bytes)")]
    TooLarge { len: usize, max: usize },

    #[error("{kind} message is missing the `{field}` field")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind} message has an empty identity")]
    EmptyIdentity { kind: &'static str },

    #[error("unrecognized message: no known prefix and no `|` separator")]
    Unrecognized,
}

/// A well-formed command the issuing connection is not allowed to perform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("connection is bound to {bound:?} but the command claims `{claimed}`")]
    IdentityMismatch {
        bound: Option<String>,
        claimed: String,
    },

    #[error("no language is known for `{identity}`")]
    UnknownLanguage { identity: String },

    #[error("connection {0} is no longer registered")]
    UnknownConnection(Uuid),
}

/// I/O failure on a single connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("write to {addr} ({id}) failed: {source}")]
    PeerWrite {
        id: Uuid,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("read from {addr} failed: {source}")]
    PeerRead {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection {0} is closed")]
    Closed(Uuid),
}
