use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket or handshake failure. Always fatal to the session.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server's signed key material did not verify against the pinned key.
    #[error("Server identity verification failed")]
    AuthenticationFailed,

    /// The server answered the connection with the all-zero key signal.
    #[error("Server refused the connection")]
    ServerRefused,

    /// The peer broke the wire contract. Fatal, no recovery within the session.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Precondition or exclusivity violation on a public call. Caller misuse,
    /// never retried internally.
    #[error("Operation rejected: {0}")]
    Rejected(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
