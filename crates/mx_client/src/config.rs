//! Connection settings consumed by [`crate::ProtocolSession::connect`].

use std::time::Duration;

/// Everything a session needs to reach and authenticate one server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the single server this client talks to.
    pub server_addr: String,
    /// Statically pinned Ed25519 verifying key of the server.
    pub server_signing_key: [u8; 32],
    /// Cap on the whole transport bootstrap, connect included.
    pub handshake_timeout: Duration,
    /// Short socket read timeout that turns the blocking read into a poll.
    pub read_timeout: Duration,
    /// Deadline for a conversation negotiation round and for acting on a
    /// received invite.
    pub negotiation_timeout: Duration,
}

impl ClientConfig {
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);
    pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(server_addr: impl Into<String>, server_signing_key: [u8; 32]) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_signing_key,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            negotiation_timeout: Self::DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}
