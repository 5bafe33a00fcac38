//! Peer-to-peer conversation key exchange over the secured transport.
//!
//! The server only relays these envelopes; the resulting keys never leave
//! the two clients. The initiator takes the server seat of the key
//! agreement because it generated the invite, the responder the client
//! seat. Both roles block their calling task on the session inbox, bounded
//! by the negotiation deadline.
//!
//! Sequence, A inviting B:
//!
//! ```text
//! A -> B  EXCHANGE_KEYS         [ASK]
//! B -> A  EXCHANGE_KEYS         B's public key   (or [DENY])
//! A -> B  EXCHANGE_KEYS_DONE    A's public key
//! B -> A  EXCHANGE_HEADERS      B's stream header
//! A -> B  EXCHANGE_HEADERS_DONE A's stream header
//! ```

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use mx_crypto::{
    client_session_keys, server_session_keys, CryptoError, KeyPair, PullStream, PushStream,
    SessionKeys, PUBLIC_KEY_SIZE, STREAM_HEADER_SIZE,
};
use mx_proto::{Envelope, Flag, KEY_EXCHANGE_ASK, KEY_EXCHANGE_DENY};

use crate::session::SessionInner;

/// The coder pair of an established end-to-end conversation. Independent
/// of the transport link: material encrypted here is opaque to the server.
pub struct ConversationChannel {
    push: PushStream,
    pull: PullStream,
}

impl ConversationChannel {
    /// Encrypt the next outbound conversation message.
    pub fn seal(&mut self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.push.push(plain)
    }

    /// Decrypt the next inbound conversation message.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pull.pull(ciphertext)
    }
}

/// Initiator role. Returns `None` on deny, timeout, malformed reply, or
/// send failure; the caller clears the exclusivity gate.
pub(crate) async fn initiate(inner: &SessionInner, peer: u32) -> Option<ConversationChannel> {
    inner.drain_inbox().await;
    let deadline = Instant::now() + inner.negotiation_timeout;

    let ask = inner.negotiation_envelope(Flag::ExchangeKeys, peer, vec![KEY_EXCHANGE_ASK]);
    if !inner.send_envelope(&ask).await {
        return None;
    }

    let reply = await_reply(inner, peer, Flag::ExchangeKeys, deadline).await?;
    if reply.body.as_deref() == Some(&[KEY_EXCHANGE_DENY]) {
        debug!(peer, "conversation invite declined");
        return None;
    }
    let peer_pk: [u8; PUBLIC_KEY_SIZE] = body_array(&reply)?;

    let keypair = KeyPair::generate();
    let keys = match server_session_keys(&keypair, &peer_pk) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(peer, error = %err, "conversation key agreement failed");
            return None;
        }
    };
    let done = inner.negotiation_envelope(
        Flag::ExchangeKeysDone,
        peer,
        keypair.public_bytes().to_vec(),
    );
    if !inner.send_envelope(&done).await {
        return None;
    }

    let header_reply = await_reply(inner, peer, Flag::ExchangeHeaders, deadline).await?;
    let peer_header: [u8; STREAM_HEADER_SIZE] = body_array(&header_reply)?;

    finish(inner, peer, keys, &peer_header, Flag::ExchangeHeadersDone).await
}

/// Responder role, run after the invite was accepted within its deadline.
pub(crate) async fn respond(
    inner: &SessionInner,
    peer: u32,
    deadline: Instant,
) -> Option<ConversationChannel> {
    inner.drain_inbox().await;

    let keypair = KeyPair::generate();
    let offer = inner.negotiation_envelope(
        Flag::ExchangeKeys,
        peer,
        keypair.public_bytes().to_vec(),
    );
    if !inner.send_envelope(&offer).await {
        return None;
    }

    let reply = await_reply(inner, peer, Flag::ExchangeKeysDone, deadline).await?;
    let peer_pk: [u8; PUBLIC_KEY_SIZE] = body_array(&reply)?;
    let keys = match client_session_keys(&keypair, &peer_pk) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(peer, error = %err, "conversation key agreement failed");
            return None;
        }
    };

    let (push, own_header) = match PushStream::new(&keys.tx) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(peer, error = %err, "conversation stream setup failed");
            return None;
        }
    };
    let headers = inner.negotiation_envelope(Flag::ExchangeHeaders, peer, own_header.to_vec());
    if !inner.send_envelope(&headers).await {
        return None;
    }

    let header_reply = await_reply(inner, peer, Flag::ExchangeHeadersDone, deadline).await?;
    let peer_header: [u8; STREAM_HEADER_SIZE] = body_array(&header_reply)?;
    let pull = match PullStream::new(&keys.rx, &peer_header) {
        Ok(pull) => pull,
        Err(err) => {
            warn!(peer, error = %err, "conversation stream setup failed");
            return None;
        }
    };

    debug!(peer, "conversation established (responder)");
    Some(ConversationChannel { push, pull })
}

/// Initiator tail: seed both coder halves and send our header last.
async fn finish(
    inner: &SessionInner,
    peer: u32,
    keys: SessionKeys,
    peer_header: &[u8; STREAM_HEADER_SIZE],
    closing_flag: Flag,
) -> Option<ConversationChannel> {
    let pull = match PullStream::new(&keys.rx, peer_header) {
        Ok(pull) => pull,
        Err(err) => {
            warn!(peer, error = %err, "conversation stream setup failed");
            return None;
        }
    };
    let (push, own_header) = match PushStream::new(&keys.tx) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(peer, error = %err, "conversation stream setup failed");
            return None;
        }
    };
    let closing = inner.negotiation_envelope(closing_flag, peer, own_header.to_vec());
    if !inner.send_envelope(&closing).await {
        return None;
    }

    debug!(peer, "conversation established (initiator)");
    Some(ConversationChannel { push, pull })
}

/// Wait on the inbox for the negotiation reply `flag` from `peer`.
/// Envelopes from other peers are stale cross-round leftovers and are
/// discarded; a wrong flag from the right peer fails the round.
async fn await_reply(
    inner: &SessionInner,
    peer: u32,
    flag: Flag,
    deadline: Instant,
) -> Option<Envelope> {
    let mut inbox = inner.inbox_rx.lock().await;
    loop {
        let envelope = match timeout_at(deadline, inbox.recv()).await {
            Err(_) => {
                debug!(peer, expected = ?flag, "negotiation reply timed out");
                return None;
            }
            // Sender half dropped: the session is tearing down.
            Ok(None) => return None,
            Ok(Some(envelope)) => envelope,
        };
        if envelope.from != peer {
            debug!(from = envelope.from, peer, "discarding negotiation envelope from unexpected peer");
            continue;
        }
        if envelope.flag != flag {
            warn!(got = ?envelope.flag, expected = ?flag, "unexpected negotiation flag");
            return None;
        }
        return Some(envelope);
    }
}

fn body_array<const N: usize>(envelope: &Envelope) -> Option<[u8; N]> {
    let body = envelope.body.as_deref()?;
    match body.try_into() {
        Ok(array) => Some(array),
        Err(_) => {
            warn!(
                flag = ?envelope.flag,
                got = body.len(),
                expected = N,
                "negotiation body has the wrong size"
            );
            None
        }
    }
}
