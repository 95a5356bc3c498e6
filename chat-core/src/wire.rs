//! Framing: 4-byte LE length prefix + ChaCha20-Poly1305 ciphertext of a bincode message.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encrypts outgoing messages for one direction of a connection.
/// Nonce: 64-bit counter, starting at zero, never reused under one key.
pub struct FrameSealer {
    cipher: ChaCha20Poly1305,
    nonce: u64,
}

impl FrameSealer {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            nonce: 0,
        }
    }

    /// Encode, encrypt and length-prefix `msg`. Consumes one nonce.
    pub fn seal(&mut self, msg: &Message) -> Result<Vec<u8>, FrameError> {
        let payload = bincode::serialize(msg).map_err(FrameError::Encode)?;
        let nonce = nonce_bytes(next_nonce(&mut self.nonce)?);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|_| WireCryptoError::Encrypt)?;
        let len = u32::try_from(sealed.len()).map_err(|_| FrameError::TooLarge)?;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge);
        }
        let mut out = Vec::with_capacity(LEN_SIZE + sealed.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

/// Decrypts incoming frames for one direction of a connection.
pub struct FrameOpener {
    cipher: ChaCha20Poly1305,
    nonce: u64,
}

impl FrameOpener {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            nonce: 0,
        }
    }

    /// Decrypt and decode one frame body (without its length prefix).
    pub fn open(&mut self, body: &[u8]) -> Result<Message, FrameError> {
        let nonce = nonce_bytes(next_nonce(&mut self.nonce)?);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), body)
            .map_err(|_| WireCryptoError::Decrypt)?;
        bincode::deserialize(&plain).map_err(FrameError::Decode)
    }
}

/// Body length announced by a frame header.
pub fn frame_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameError> {
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge);
    }
    Ok(len as usize)
}

fn next_nonce(counter: &mut u64) -> Result<u64, FrameError> {
    let nonce = *counter;
    *counter = counter.checked_add(1).ok_or(FrameError::NonceExhausted)?;
    Ok(nonce)
}

fn nonce_bytes(nonce: u64) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[4..].copy_from_slice(&nonce.to_le_bytes());
    out
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("encode error: {0}")]
    Encode(bincode::Error),
    #[error("decode error: {0}")]
    Decode(bincode::Error),
    #[error("frame too large")]
    TooLarge,
    #[error("nonce space exhausted")]
    NonceExhausted,
    #[error(transparent)]
    Crypto(#[from] WireCryptoError),
}
