//! Operation tags and reserved wire identifiers.

use crate::error::ProtoError;

/// The server as a sender or recipient.
pub const SERVER_ID: u32 = 0;

/// Sender id used before login assigns a real one.
pub const ANONYMOUS_ID: u32 = u32::MAX;

/// Single-byte EXCHANGE_KEYS body opening a conversation negotiation.
pub const KEY_EXCHANGE_ASK: u8 = 0x01;

/// Single-byte EXCHANGE_KEYS body declining an invite.
pub const KEY_EXCHANGE_DENY: u8 = 0x02;

/// Operation tag carried in every envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Flag {
    /// Ordinary chat message between two clients.
    Proceed = 0,
    /// Server-wide announcement.
    Broadcast = 1,
    LogIn = 2,
    LoggedIn = 3,
    Register = 4,
    Registered = 5,
    /// Server-reported operation failure; body names the failed flag.
    Error = 6,
    FetchUsers = 7,
    FetchMessages = 8,
    /// Conversation negotiation: invite / public key reply.
    ExchangeKeys = 9,
    /// Conversation negotiation: initiator's public key.
    ExchangeKeysDone = 10,
    /// Conversation negotiation: stream header.
    ExchangeHeaders = 11,
    /// Conversation negotiation: closing stream header.
    ExchangeHeadersDone = 12,
    FileAsk = 13,
    File = 14,
    Shutdown = 15,
}

impl Flag {
    pub fn from_u32(value: u32) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(Flag::Proceed),
            1 => Ok(Flag::Broadcast),
            2 => Ok(Flag::LogIn),
            3 => Ok(Flag::LoggedIn),
            4 => Ok(Flag::Register),
            5 => Ok(Flag::Registered),
            6 => Ok(Flag::Error),
            7 => Ok(Flag::FetchUsers),
            8 => Ok(Flag::FetchMessages),
            9 => Ok(Flag::ExchangeKeys),
            10 => Ok(Flag::ExchangeKeysDone),
            11 => Ok(Flag::ExchangeHeaders),
            12 => Ok(Flag::ExchangeHeadersDone),
            13 => Ok(Flag::FileAsk),
            14 => Ok(Flag::File),
            15 => Ok(Flag::Shutdown),
            other => Err(ProtoError::UnknownFlag(other)),
        }
    }

    /// Flags that may legally travel without a body.
    ///
    /// FETCH_MESSAGES is in the set because both the request and the
    /// server's no-history reply are bodyless, while relayed history
    /// pages carry one.
    pub fn body_optional(self) -> bool {
        matches!(
            self,
            Flag::LoggedIn
                | Flag::Registered
                | Flag::FetchUsers
                | Flag::FetchMessages
                | Flag::Shutdown
                | Flag::ExchangeHeadersDone
        )
    }

    /// True for the four tags that make up a conversation negotiation.
    pub fn is_key_exchange(self) -> bool {
        matches!(
            self,
            Flag::ExchangeKeys
                | Flag::ExchangeKeysDone
                | Flag::ExchangeHeaders
                | Flag::ExchangeHeadersDone
        )
    }
}
