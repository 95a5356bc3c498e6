//! Error types for the node: connection failures and startup failures.

use std::time::Duration;

use chat_core::{AddressError, FrameError, HandshakeError, IdentityError, PeerId};
use thiserror::Error;

/// Anything that stops a dial from producing a stream.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no known addresses for peer {0}")]
    NoAddresses(PeerId),

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("dialed {expected} but {actual} answered")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("remote peer does not support protocol {0}")]
    ProtocolRejected(String),

    #[error("unexpected message during protocol negotiation")]
    UnexpectedMessage,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the session layer to `main`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub type Result<T, E = NodeError> = std::result::Result<T, E>;
