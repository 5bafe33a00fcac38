//! The wire envelope and its binary codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! flag(4) | timestamp(8) | body_len(4) | index(4) | count(4)
//!     | from(4) | to(4) | token(80) | body(body_len)
//! ```
//!
//! An encoded envelope is exactly `HEAD_SIZE + body_len` bytes and never
//! exceeds `MAX_MESSAGE_SIZE`.

use bytes::{Buf, BufMut};

use crate::error::ProtoError;
use crate::flag::Flag;

/// Ed25519 signature length.
pub const SIGNATURE_SIZE: usize = 64;

/// Leading token bytes: either the issued session value or [`UNSIGNED_TOKEN`].
pub const TOKEN_PAYLOAD_SIZE: usize = 16;

/// Token layout: `payload(16) | signature(64)`.
pub const TOKEN_SIZE: usize = TOKEN_PAYLOAD_SIZE + SIGNATURE_SIZE;

/// Fixed header length: 4 + 8 + 4 + 4 + 4 + 4 + 4 + TOKEN_SIZE.
pub const HEAD_SIZE: usize = 32 + TOKEN_SIZE;

pub const MAX_MESSAGE_SIZE: usize = 256;

pub const MAX_BODY_SIZE: usize = MAX_MESSAGE_SIZE - HEAD_SIZE;

/// Token carried before the server issues one.
pub const ANONYMOUS_TOKEN: Token = [0u8; TOKEN_SIZE];

/// Payload the server signs into control-message tokens.
pub const UNSIGNED_TOKEN: [u8; TOKEN_PAYLOAD_SIZE] = *b"unauthenticated!";

pub type Token = [u8; TOKEN_SIZE];

/// One self-contained protocol message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flag: Flag,
    /// Sender-assigned capture time, milliseconds since epoch.
    pub timestamp: i64,
    /// Position within a multi-part reply; `index == count - 1` is final.
    pub index: u32,
    pub count: u32,
    pub from: u32,
    pub to: u32,
    pub token: Token,
    pub body: Option<Vec<u8>>,
}

impl Envelope {
    /// True when this envelope is the last part of its reply.
    pub fn is_last_part(&self) -> bool {
        self.count > 0 && self.index == self.count - 1
    }

    fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    fn check_body_rule(&self) -> Result<(), ProtoError> {
        match &self.body {
            None => {
                if !self.flag.body_optional() {
                    return Err(ProtoError::BodyRule {
                        flag: self.flag,
                        got: 0,
                        expected: "1..=MAX_BODY_SIZE bytes",
                    });
                }
            }
            Some(body) => {
                if body.is_empty() || body.len() > MAX_BODY_SIZE {
                    return Err(ProtoError::BodyRule {
                        flag: self.flag,
                        got: body.len(),
                        expected: "1..=MAX_BODY_SIZE bytes",
                    });
                }
            }
        }
        if self.timestamp < 0 {
            return Err(ProtoError::InvalidField("negative timestamp".into()));
        }
        Ok(())
    }

    /// Encode to exactly `HEAD_SIZE + body_len` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        self.check_body_rule()?;
        let mut buf = Vec::with_capacity(HEAD_SIZE + self.body_len());
        buf.put_u32_le(self.flag as u32);
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.body_len() as u32);
        buf.put_u32_le(self.index);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.from);
        buf.put_u32_le(self.to);
        buf.put_slice(&self.token);
        if let Some(body) = &self.body {
            buf.put_slice(body);
        }
        Ok(buf)
    }

    /// Exact inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() < HEAD_SIZE {
            return Err(ProtoError::MalformedEnvelope(format!(
                "{} bytes is shorter than the {HEAD_SIZE}-byte header",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let flag = Flag::from_u32(buf.get_u32_le())?;
        let timestamp = buf.get_i64_le();
        let body_len = buf.get_u32_le() as usize;
        let index = buf.get_u32_le();
        let count = buf.get_u32_le();
        let from = buf.get_u32_le();
        let to = buf.get_u32_le();
        let mut token = [0u8; TOKEN_SIZE];
        buf.copy_to_slice(&mut token);

        if body_len > MAX_BODY_SIZE {
            return Err(ProtoError::MalformedEnvelope(format!(
                "declared body of {body_len} bytes exceeds the {MAX_BODY_SIZE}-byte cap"
            )));
        }
        if buf.remaining() != body_len {
            return Err(ProtoError::MalformedEnvelope(format!(
                "declared body of {body_len} bytes but {} remain",
                buf.remaining()
            )));
        }
        let body = if body_len == 0 {
            None
        } else {
            Some(buf.to_vec())
        };

        let envelope = Envelope {
            flag,
            timestamp,
            index,
            count,
            from,
            to,
            token,
            body,
        };
        envelope.check_body_rule()?;
        Ok(envelope)
    }

    /// ERROR body helper: the flag of the operation that failed.
    pub fn error_body(failed: Flag) -> Vec<u8> {
        (failed as u32).to_le_bytes().to_vec()
    }

    /// Decode an ERROR body back into the failed flag.
    pub fn decode_error_body(body: &[u8]) -> Result<Flag, ProtoError> {
        let raw: [u8; 4] = body
            .try_into()
            .map_err(|_| ProtoError::MalformedRecord("error body must be 4 bytes".into()))?;
        Flag::from_u32(u32::from_le_bytes(raw))
    }
}
