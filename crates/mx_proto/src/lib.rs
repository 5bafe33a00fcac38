//! mx_proto — Wire types and binary codec for the message exchanger
//!
//! Everything that crosses the socket is one fixed-layout, little-endian
//! binary format: a flag-tagged [`Envelope`] header followed by an optional
//! body. This crate is pure data — no sockets, no crypto, no state.
//!
//! # Modules
//! - `flag`     — Operation tags, sentinel ids, body rules
//! - `envelope` — The wire envelope and its codec
//! - `user`     — Fixed-width user and credential records
//! - `error`    — Codec error type

pub mod envelope;
pub mod error;
pub mod flag;
pub mod user;

pub use envelope::{
    Envelope, Token, ANONYMOUS_TOKEN, HEAD_SIZE, MAX_BODY_SIZE, MAX_MESSAGE_SIZE,
    SIGNATURE_SIZE, TOKEN_PAYLOAD_SIZE, TOKEN_SIZE, UNSIGNED_TOKEN,
};
pub use error::ProtoError;
pub use flag::{Flag, ANONYMOUS_ID, KEY_EXCHANGE_ASK, KEY_EXCHANGE_DENY, SERVER_ID};
pub use user::{Credentials, UserInfo, UNHASHED_PASSWORD_SIZE, USERNAME_SIZE, USER_INFO_SIZE};
