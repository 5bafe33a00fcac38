//! Ordered authenticated-encryption message streams.
//!
//! XChaCha20-Poly1305 with deterministic 24-byte nonces: a random 16-byte
//! prefix (carried in the stream header) followed by a 64-bit little-endian
//! message counter. Reordered, replayed, or dropped ciphertexts fail the
//! tag check on the puller because the counters diverge.
//!
//! Each direction of a link is one `PushStream`/`PullStream` pair seeded
//! from the same key, joined by the header the pusher emits at creation.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// `prefix(16) | initial counter(8 LE)`.
pub const STREAM_HEADER_SIZE: usize = 24;

const NONCE_PREFIX_SIZE: usize = 16;

pub type StreamHeader = [u8; STREAM_HEADER_SIZE];

/// Encrypting half of a stream.
pub struct PushStream {
    cipher: XChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
}

impl PushStream {
    /// Create a fresh stream and the header its peer needs to follow it.
    pub fn new(key: &[u8; 32]) -> Result<(Self, StreamHeader), CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKey("stream key must be 32 bytes".into()))?;
        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut prefix);

        let mut header = [0u8; STREAM_HEADER_SIZE];
        header[..NONCE_PREFIX_SIZE].copy_from_slice(&prefix);
        // Initial counter is zero; the trailing header bytes say so
        // explicitly to keep the layout self-describing.
        Ok((Self { cipher, prefix, counter: 0 }, header))
    }

    /// Encrypt the next message. Ciphertext carries the Poly1305 tag.
    pub fn push(&mut self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = next_nonce(&self.prefix, &mut self.counter)?;
        self.cipher
            .encrypt(&nonce, plain)
            .map_err(|_| CryptoError::AeadEncrypt)
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.prefix.zeroize();
    }
}

/// Decrypting half, seeded from the peer's header.
pub struct PullStream {
    cipher: XChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
}

impl PullStream {
    pub fn new(key: &[u8; 32], header: &StreamHeader) -> Result<Self, CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKey("stream key must be 32 bytes".into()))?;
        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        prefix.copy_from_slice(&header[..NONCE_PREFIX_SIZE]);
        let counter = u64::from_le_bytes(header[NONCE_PREFIX_SIZE..].try_into().expect("8 bytes"));
        Ok(Self { cipher, prefix, counter })
    }

    /// Decrypt the next message in sequence.
    pub fn pull(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = next_nonce(&self.prefix, &mut self.counter)?;
        self.cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| CryptoError::AeadDecrypt)
    }
}

impl Drop for PullStream {
    fn drop(&mut self) {
        self.prefix.zeroize();
    }
}

fn next_nonce(
    prefix: &[u8; NONCE_PREFIX_SIZE],
    counter: &mut u64,
) -> Result<XNonce, CryptoError> {
    let current = *counter;
    *counter = counter.checked_add(1).ok_or(CryptoError::StreamExhausted)?;

    let mut nonce = [0u8; 24];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&current.to_le_bytes());
    Ok(XNonce::from(nonce))
}
