//! Process identity: keypair and peer ID.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};

/// Length of a peer ID in bytes.
pub const PEER_ID_LEN: usize = 16;

/// Public key (32 bytes, X25519). Sent in the handshake hello.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a `PublicKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

/// Peer ID: deterministic hash of the public key. Printed as 32 lowercase hex chars.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Derive the peer ID of a public key: first 16 bytes of SHA-256.
    pub fn from_public_key(public: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public);
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(&digest[..PEER_ID_LEN]);
        PeerId(id)
    }

    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PEER_ID_LEN * 2 {
            return Err(PeerIdParseError::Length(s.len()));
        }
        let mut id = [0u8; PEER_ID_LEN];
        hex::decode_to_slice(s, &mut id).map_err(PeerIdParseError::Hex)?;
        Ok(PeerId(id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerIdParseError {
    #[error("expected 32 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(hex::FromHexError),
}

/// X25519 keypair. Keep secret key private; expose only public key and peer ID.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
    peer_id: PeerId,
}

impl Keypair {
    /// Generate a new keypair from the OS random source and derive the peer ID.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
        let secret = StaticSecret::from(seed);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        let peer_id = PeerId::from_public_key(public.as_bytes());
        Ok(Self {
            secret,
            public,
            peer_id,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Diffie-Hellman with another peer's public key.
    pub fn shared_secret(&self, other_public: &PublicKey) -> SharedSecret {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to generate keypair: {0}")]
    KeyGeneration(String),
}
