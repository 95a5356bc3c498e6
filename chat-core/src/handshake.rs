//! Connection handshake: hello exchange and per-direction session keys.
//!
//! Each side sends `version (1) | peer_id (16) | public_key (32)`. The peer ID
//! must be the hash of the public key. Keys are derived from the X25519 shared
//! secret, bound to both public keys, one key per direction.

use sha2::{Digest, Sha256};

use crate::identity::{Keypair, PeerId, PublicKey, PEER_ID_LEN};
use crate::protocol::PROTOCOL_VERSION;

pub const HELLO_SIZE: usize = 1 + PEER_ID_LEN + 32; // version + peer_id + public_key

const KEY_LABEL: &[u8] = b"peer-chat-session-v1";

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Dialer,
    Listener,
}

/// Peer identity announced in a hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub peer_id: PeerId,
    pub public_key: PublicKey,
}

/// Our own hello.
pub fn encode_hello(keypair: &Keypair) -> [u8; HELLO_SIZE] {
    let mut out = [0u8; HELLO_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..1 + PEER_ID_LEN].copy_from_slice(keypair.peer_id().as_bytes());
    out[1 + PEER_ID_LEN..].copy_from_slice(keypair.public_key().as_bytes());
    out
}

/// Parse and check a remote hello.
pub fn decode_hello(buf: &[u8; HELLO_SIZE]) -> Result<Hello, HandshakeError> {
    if buf[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(buf[0]));
    }
    let mut id = [0u8; PEER_ID_LEN];
    id.copy_from_slice(&buf[1..1 + PEER_ID_LEN]);
    let mut key = [0u8; 32];
    key.copy_from_slice(&buf[1 + PEER_ID_LEN..]);

    let peer_id = PeerId::from_bytes(id);
    let derived = PeerId::from_public_key(&key);
    if derived != peer_id {
        return Err(HandshakeError::IdentityMismatch {
            claimed: peer_id,
            derived,
        });
    }
    Ok(Hello {
        peer_id,
        public_key: PublicKey::from_bytes(key),
    })
}

/// Keys for one connection, already oriented for our side.
pub struct SessionKeys {
    pub send: [u8; 32],
    pub recv: [u8; 32],
}

/// Derive both directional keys from our keypair and the remote hello.
pub fn derive_session_keys(
    keypair: &Keypair,
    remote: &PublicKey,
    side: Side,
) -> Result<SessionKeys, HandshakeError> {
    let shared = keypair.shared_secret(remote);
    if !shared.was_contributory() {
        return Err(HandshakeError::NonContributory);
    }
    let (dialer_pk, listener_pk) = match side {
        Side::Dialer => (keypair.public_key(), remote),
        Side::Listener => (remote, keypair.public_key()),
    };
    let key = |direction: &[u8]| -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(KEY_LABEL);
        hasher.update(direction);
        hasher.update(dialer_pk.as_bytes());
        hasher.update(listener_pk.as_bytes());
        hasher.update(shared.as_bytes());
        hasher.finalize().into()
    };
    let to_listener = key(b"dialer->listener");
    let to_dialer = key(b"listener->dialer");
    Ok(match side {
        Side::Dialer => SessionKeys {
            send: to_listener,
            recv: to_dialer,
        },
        Side::Listener => SessionKeys {
            send: to_dialer,
            recv: to_listener,
        },
    })
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("peer claims id {claimed} but its key hashes to {derived}")]
    IdentityMismatch { claimed: PeerId, derived: PeerId },
    #[error("key exchange produced a non-contributory secret")]
    NonContributory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrip() {
        let kp = Keypair::generate().unwrap();
        let hello = decode_hello(&encode_hello(&kp)).unwrap();
        assert_eq!(hello.peer_id, kp.peer_id());
        assert_eq!(&hello.public_key, kp.public_key());
    }

    #[test]
    fn hello_with_other_version_is_rejected() {
        let kp = Keypair::generate().unwrap();
        let mut buf = encode_hello(&kp);
        buf[0] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            decode_hello(&buf),
            Err(HandshakeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn hello_with_borrowed_id_is_rejected() {
        let kp = Keypair::generate().unwrap();
        let other = Keypair::generate().unwrap();
        let mut buf = encode_hello(&kp);
        buf[1..1 + PEER_ID_LEN].copy_from_slice(other.peer_id().as_bytes());
        assert!(matches!(
            decode_hello(&buf),
            Err(HandshakeError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn directional_keys_match_across_sides() {
        let dialer = Keypair::generate().unwrap();
        let listener = Keypair::generate().unwrap();
        let d = derive_session_keys(&dialer, listener.public_key(), Side::Dialer).unwrap();
        let l = derive_session_keys(&listener, dialer.public_key(), Side::Listener).unwrap();
        assert_eq!(d.send, l.recv);
        assert_eq!(d.recv, l.send);
        assert_ne!(d.send, d.recv);
    }

    #[test]
    fn low_order_key_is_rejected() {
        let kp = Keypair::generate().unwrap();
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            derive_session_keys(&kp, &zero, Side::Dialer),
            Err(HandshakeError::NonContributory)
        ));
    }
}
