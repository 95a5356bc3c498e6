//! Peer chat core: identity, peer addresses, handshake and wire framing.
//! No I/O; the node crate drives sockets and feeds bytes through here.

pub mod address;
pub mod handshake;
pub mod identity;
pub mod protocol;
pub mod wire;

pub use address::{
    build_listen_address, compose_full_address, resolve_target, AddressError, HostAddr,
    PeerAddress, TransportAddress,
};
pub use handshake::{HandshakeError, Side};
pub use identity::{IdentityError, Keypair, PeerId, PublicKey};
pub use protocol::{Message, ProtocolId, CHAT_PROTOCOL, PROTOCOL_VERSION};
pub use wire::{FrameError, FrameOpener, FrameSealer, WireCryptoError};
