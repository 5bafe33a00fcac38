//! mx_crypto — Cryptographic building blocks for the message exchanger
//!
//! Thin, typed wrappers over ecosystem primitives; no sockets, no protocol
//! state. The transport bootstrap and the conversation overlay both build
//! on the same three pieces:
//!
//! - `sign`   — Ed25519 identities and pinned-key verification
//! - `kx`     — X25519 key agreement with client/server role split
//! - `stream` — ordered XChaCha20-Poly1305 message streams

pub mod error;
pub mod kx;
pub mod sign;
pub mod stream;

pub use error::CryptoError;
pub use kx::{client_session_keys, server_session_keys, KeyPair, SessionKeys, PUBLIC_KEY_SIZE};
pub use sign::{ServerVerifier, SigningIdentity, SIGNATURE_SIZE};
pub use stream::{PullStream, PushStream, StreamHeader, STREAM_HEADER_SIZE};
