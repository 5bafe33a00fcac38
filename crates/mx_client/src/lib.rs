//! mx_client — Client engine of the message exchanger
//!
//! Establishes an authenticated, encrypted transport to one server, runs
//! the application protocol over it, and negotiates end-to-end encrypted
//! conversations with other clients relayed through that server.
//!
//! The pieces, leaf-first:
//!
//! - [`SecureChannel`] — the encrypted transport link and its bootstrap
//! - [`ConversationChannel`] — the peer-to-peer coder pair the
//!   negotiation overlay produces
//! - [`ProtocolSession`] — the state machine owning the channel, the read
//!   loop, and the public operation surface
//! - [`SessionEvents`] / [`KeyValueStore`] — collaborator seams for the
//!   presentation layer and the at-rest store

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod negotiate;
pub mod session;
pub mod store;

pub use channel::{ReadOutcome, SecureChannel};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{DisconnectReason, NullEvents, SessionEvents};
pub use negotiate::ConversationChannel;
pub use session::ProtocolSession;
pub use store::{KeyValueStore, MemoryStore, StoreError};
