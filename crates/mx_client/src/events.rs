//! Collaborator event sink fed by the session's read loop.

use mx_proto::{Flag, UserInfo};

/// Why a session became unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    Requested,
    /// The server announced it is going down.
    ServerShutdown,
    /// The server rejected the login attempt.
    LoginRejected,
    /// The socket died or reached EOF.
    TransportLost,
    /// The peer broke the wire contract and the session was torn down.
    ProtocolViolation,
}

/// Callbacks the session fires as inbound traffic is dispatched.
///
/// All methods default to no-ops so embedders implement only what they
/// render. Callbacks run on the read-loop task and must not block.
pub trait SessionEvents: Send + Sync {
    fn connected(&self) {}

    fn disconnected(&self, _reason: DisconnectReason) {}

    fn logged_in(&self, _user_id: u32) {}

    fn registered(&self) {}

    /// The server reported a failed operation; `failed` names its flag.
    fn server_error(&self, _failed: Flag) {}

    /// One entry of a user fetch; `last` marks the final entry of the
    /// final page.
    fn user_listed(&self, _user: UserInfo, _last: bool) {}

    /// An ordinary chat message.
    fn message_received(&self, _from: u32, _timestamp: i64, _body: Vec<u8>) {}

    /// One entry of a message-history fetch.
    fn history_message(&self, _from: u32, _timestamp: i64, _body: Vec<u8>, _last: bool) {}

    /// The server had no stored messages for the fetch.
    fn history_empty(&self) {}

    fn broadcast_received(&self, _from: u32, _body: Vec<u8>) {}

    /// A peer asked to open an end-to-end conversation. Answer with
    /// `reply_to_invite` before the negotiation deadline lapses.
    fn invite_received(&self, _from: u32) {}

    fn file_offer(&self, _from: u32, _name: Vec<u8>) {}

    fn file_chunk(&self, _from: u32, _index: u32, _count: u32, _data: Vec<u8>) {}
}

/// Sink that ignores every event.
pub struct NullEvents;

impl SessionEvents for NullEvents {}
