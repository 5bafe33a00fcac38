//! The client-side protocol state machine.
//!
//! One `ProtocolSession` owns one [`SecureChannel`] and one spawned read
//! loop for the lifetime of a connection. Public operations may be called
//! from any task; only `create_conversation` and `reply_to_invite` await
//! completion. A session that disconnects is finished for good: reconnect
//! by calling [`ProtocolSession::connect`] again.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use mx_crypto::ServerVerifier;
use mx_proto::{
    Credentials, Envelope, Flag, Token, UserInfo, ANONYMOUS_ID, ANONYMOUS_TOKEN,
    KEY_EXCHANGE_ASK, KEY_EXCHANGE_DENY, MAX_BODY_SIZE, SERVER_ID, SIGNATURE_SIZE,
    TOKEN_PAYLOAD_SIZE,
};

use crate::channel::{ReadOutcome, SecureChannel};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{DisconnectReason, SessionEvents};
use crate::negotiate::{self, ConversationChannel};
use crate::store::{KeyValueStore, CREDENTIALS_KEY, TOKEN_KEY};

/// Connection lifecycle. Connecting and handshaking happen inside
/// `connect`; a constructed session starts unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Authenticated,
    /// Terminal. No operation succeeds past this point.
    Disconnected,
}

/// An invite a peer sent us, not yet answered.
struct PendingInvite {
    from: u32,
    deadline: Instant,
}

/// All mutable session state behind one lock, so every exclusivity check
/// is a test-and-set.
struct SessionState {
    phase: Phase,
    user_id: u32,
    token: Token,
    fetching_users: bool,
    fetching_messages: bool,
    setting_up_conversation: bool,
    exchanging_file: bool,
    pending_invite: Option<PendingInvite>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Unauthenticated,
            user_id: ANONYMOUS_ID,
            token: ANONYMOUS_TOKEN,
            fetching_users: false,
            fetching_messages: false,
            setting_up_conversation: false,
            exchanging_file: false,
            pending_invite: None,
        }
    }

    fn require_authenticated(&self) -> Result<(), ClientError> {
        match self.phase {
            Phase::Authenticated => Ok(()),
            Phase::Unauthenticated => Err(ClientError::Rejected("not logged in")),
            Phase::Disconnected => Err(ClientError::Rejected("session is disconnected")),
        }
    }

    fn require_unauthenticated(&self) -> Result<(), ClientError> {
        match self.phase {
            Phase::Unauthenticated => Ok(()),
            Phase::Authenticated => Err(ClientError::Rejected("already logged in")),
            Phase::Disconnected => Err(ClientError::Rejected("session is disconnected")),
        }
    }

    fn negotiation_busy(&self) -> bool {
        self.setting_up_conversation || self.exchanging_file
    }

    /// An invite nobody answered counts as declined once its deadline
    /// lapses; the negotiation gate reopens with it.
    fn expire_stale_invite(&mut self, now: Instant) {
        if let Some(invite) = &self.pending_invite {
            if now > invite.deadline {
                self.pending_invite = None;
                self.setting_up_conversation = false;
            }
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) channel: SecureChannel,
    verifier: ServerVerifier,
    events: Arc<dyn SessionEvents>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<SessionState>,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    /// Consumed only by the one active negotiation round.
    pub(crate) inbox_rx: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
    pub(crate) negotiation_timeout: Duration,
}

/// The public operation surface of one connection.
#[derive(Clone)]
pub struct ProtocolSession {
    inner: Arc<SessionInner>,
}

impl ProtocolSession {
    /// Open the socket, run the transport bootstrap, and start the read
    /// loop. The session surfaces everything else through `events`.
    pub async fn connect(
        config: ClientConfig,
        events: Arc<dyn SessionEvents>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ClientError> {
        let verifier = ServerVerifier::from_bytes(&config.server_signing_key)
            .map_err(|err| ClientError::InvalidInput(format!("pinned server key: {err}")))?;
        let channel = SecureChannel::connect(&config, &verifier).await?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            channel,
            verifier,
            events,
            store,
            state: Mutex::new(SessionState::new()),
            inbox_tx,
            inbox_rx: AsyncMutex::new(inbox_rx),
            negotiation_timeout: config.negotiation_timeout,
        });
        tokio::spawn(read_loop(inner.clone()));

        info!(server = %config.server_addr, "session connected");
        inner.events.connected();
        Ok(Self { inner })
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().phase == Phase::Authenticated
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().phase != Phase::Disconnected
    }

    /// The server-assigned id, or [`ANONYMOUS_ID`] before login.
    pub fn user_id(&self) -> u32 {
        self.inner.state.lock().user_id
    }

    /// Single-shot authentication. A server-side failure comes back as a
    /// `server_error(LogIn)` event followed by a forced disconnect.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool, ClientError> {
        let credentials = Credentials::new(username, password)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        self.inner.state.lock().require_unauthenticated()?;
        let envelope = self
            .inner
            .envelope(Flag::LogIn, SERVER_ID, Some(credentials.encode()));
        Ok(self.inner.send_envelope(&envelope).await)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<bool, ClientError> {
        let credentials = Credentials::new(username, password)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        self.inner.state.lock().require_unauthenticated()?;
        let envelope = self
            .inner
            .envelope(Flag::Register, SERVER_ID, Some(credentials.encode()));
        Ok(self.inner.send_envelope(&envelope).await)
    }

    /// Ask for the user list. Pages come back through `user_listed`.
    pub async fn fetch_users(&self) -> Result<bool, ClientError> {
        {
            let mut state = self.inner.state.lock();
            state.require_authenticated()?;
            if state.fetching_users || state.fetching_messages {
                return Err(ClientError::Rejected("a fetch is already in flight"));
            }
            state.fetching_users = true;
        }
        let envelope = self.inner.envelope(Flag::FetchUsers, SERVER_ID, None);
        let sent = self.inner.send_envelope(&envelope).await;
        if !sent {
            self.inner.state.lock().fetching_users = false;
        }
        Ok(sent)
    }

    /// Ask for stored messages exchanged with `peer_id`. Pages come back
    /// through `history_message`, or `history_empty` when there are none.
    pub async fn fetch_messages(&self, peer_id: u32) -> Result<bool, ClientError> {
        {
            let mut state = self.inner.state.lock();
            state.require_authenticated()?;
            if state.fetching_users || state.fetching_messages {
                return Err(ClientError::Rejected("a fetch is already in flight"));
            }
            state.fetching_messages = true;
        }
        let envelope = self.inner.envelope(Flag::FetchMessages, peer_id, None);
        let sent = self.inner.send_envelope(&envelope).await;
        if !sent {
            self.inner.state.lock().fetching_messages = false;
        }
        Ok(sent)
    }

    pub async fn send_message(&self, peer_id: u32, body: &[u8]) -> Result<bool, ClientError> {
        if body.is_empty() || body.len() > MAX_BODY_SIZE {
            return Err(ClientError::InvalidInput(format!(
                "message body must be 1..={MAX_BODY_SIZE} bytes, got {}",
                body.len()
            )));
        }
        self.inner.state.lock().require_authenticated()?;
        let envelope = self.inner.envelope(Flag::Proceed, peer_id, Some(body.to_vec()));
        Ok(self.inner.send_envelope(&envelope).await)
    }

    pub async fn broadcast(&self, body: &[u8]) -> Result<bool, ClientError> {
        if body.is_empty() || body.len() > MAX_BODY_SIZE {
            return Err(ClientError::InvalidInput(format!(
                "broadcast body must be 1..={MAX_BODY_SIZE} bytes, got {}",
                body.len()
            )));
        }
        self.inner.state.lock().require_authenticated()?;
        let envelope = self.inner.envelope(Flag::Broadcast, SERVER_ID, Some(body.to_vec()));
        Ok(self.inner.send_envelope(&envelope).await)
    }

    pub async fn shutdown_server(&self) -> Result<bool, ClientError> {
        self.inner.state.lock().require_authenticated()?;
        let envelope = self.inner.envelope(Flag::Shutdown, SERVER_ID, None);
        Ok(self.inner.send_envelope(&envelope).await)
    }

    /// Open an end-to-end encrypted conversation with `peer_id`. Blocks the
    /// calling task until the negotiation completes or the deadline lapses;
    /// `None` means the peer declined, answered malformed, or timed out.
    pub async fn create_conversation(
        &self,
        peer_id: u32,
    ) -> Result<Option<ConversationChannel>, ClientError> {
        {
            let mut state = self.inner.state.lock();
            state.require_authenticated()?;
            state.expire_stale_invite(Instant::now());
            if state.negotiation_busy() {
                return Err(ClientError::Rejected(
                    "a negotiation or file exchange is already active",
                ));
            }
            state.setting_up_conversation = true;
        }
        let result = negotiate::initiate(&self.inner, peer_id).await;
        self.inner.finish_negotiation().await;
        Ok(result)
    }

    /// Answer a pending invite from `peer_id`. Declining sends the deny
    /// sentinel and resolves to `None`; accepting past the invite deadline
    /// also resolves to `None` without touching the wire.
    pub async fn reply_to_invite(
        &self,
        accept: bool,
        peer_id: u32,
    ) -> Result<Option<ConversationChannel>, ClientError> {
        let deadline = {
            let mut state = self.inner.state.lock();
            state.require_authenticated()?;
            state.expire_stale_invite(Instant::now());
            let deadline = match &state.pending_invite {
                Some(invite) if invite.from == peer_id => invite.deadline,
                _ => return Err(ClientError::Rejected("no pending invite from this peer")),
            };
            // The invite is answered; only the negotiation gate stays up
            // until the round resolves.
            state.pending_invite = None;
            deadline
        };

        let result = if !accept {
            let deny = self
                .inner
                .envelope(Flag::ExchangeKeys, peer_id, Some(vec![KEY_EXCHANGE_DENY]));
            self.inner.send_envelope(&deny).await;
            None
        } else if Instant::now() > deadline {
            warn!(peer = peer_id, "invite answered past its deadline");
            None
        } else {
            negotiate::respond(&self.inner, peer_id, deadline).await
        };
        self.inner.finish_negotiation().await;
        Ok(result)
    }

    /// Persist credentials through the store collaborator. Local only.
    pub fn save_credentials(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let credentials = Credentials::new(username, password)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        self.inner.store.put(CREDENTIALS_KEY, &credentials.encode())?;
        Ok(())
    }

    pub fn load_credentials(&self) -> Result<Option<Credentials>, ClientError> {
        match self.inner.store.get(CREDENTIALS_KEY)? {
            None => Ok(None),
            Some(bytes) => Credentials::decode(&bytes)
                .map(Some)
                .map_err(|err| ClientError::InvalidInput(format!("stored credentials: {err}"))),
        }
    }

    /// Explicit teardown. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.teardown(DisconnectReason::Requested).await;
    }
}

impl SessionInner {
    /// Stamp an envelope with the current identity and token.
    fn envelope(&self, flag: Flag, to: u32, body: Option<Vec<u8>>) -> Envelope {
        let state = self.state.lock();
        Envelope {
            flag,
            timestamp: now_millis(),
            index: 0,
            count: 1,
            from: state.user_id,
            to,
            token: state.token,
            body,
        }
    }

    pub(crate) async fn send_envelope(&self, envelope: &Envelope) -> bool {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, flag = ?envelope.flag, "refusing to send malformed envelope");
                return false;
            }
        };
        self.channel.send(&bytes).await
    }

    /// Build a negotiation envelope addressed to `peer`.
    pub(crate) fn negotiation_envelope(&self, flag: Flag, peer: u32, body: Vec<u8>) -> Envelope {
        self.envelope(flag, peer, Some(body))
    }

    /// Clear the negotiation gate and flush stale inbox entries so the next
    /// round starts clean.
    pub(crate) async fn finish_negotiation(&self) {
        {
            let mut state = self.state.lock();
            state.setting_up_conversation = false;
            state.pending_invite = None;
        }
        self.drain_inbox().await;
    }

    pub(crate) async fn drain_inbox(&self) {
        let mut inbox = self.inbox_rx.lock().await;
        while inbox.try_recv().is_ok() {}
    }

    async fn teardown(&self, reason: DisconnectReason) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Disconnected {
                return;
            }
            state.phase = Phase::Disconnected;
            state.fetching_users = false;
            state.fetching_messages = false;
            state.setting_up_conversation = false;
            state.exchanging_file = false;
            state.pending_invite = None;
        }
        self.channel.shutdown().await;
        info!(?reason, "session closed");
        self.events.disconnected(reason);
    }

    async fn dispatch(&self, envelope: Envelope) -> Result<(), ClientError> {
        debug!(flag = ?envelope.flag, from = envelope.from, "dispatching envelope");
        if envelope.from == SERVER_ID {
            self.dispatch_server(envelope).await
        } else {
            self.dispatch_peer(envelope).await
        }
    }

    /// Server-originated control traffic. The token's trailing signature is
    /// checked on every envelope so a relayed forgery cannot impersonate
    /// the server.
    async fn dispatch_server(&self, envelope: Envelope) -> Result<(), ClientError> {
        let payload = &envelope.token[..TOKEN_PAYLOAD_SIZE];
        let signature: [u8; SIGNATURE_SIZE] = envelope.token[TOKEN_PAYLOAD_SIZE..]
            .try_into()
            .expect("token layout");
        self.verifier
            .verify(payload, &signature)
            .map_err(|_| ClientError::Protocol("server token signature check failed".into()))?;

        match envelope.flag {
            Flag::LoggedIn => {
                let user_id = envelope.to;
                {
                    let mut state = self.state.lock();
                    state.phase = Phase::Authenticated;
                    state.user_id = user_id;
                    state.token = envelope.token;
                }
                if let Err(err) = self.store.put(TOKEN_KEY, &envelope.token) {
                    warn!(error = %err, "failed to persist session token");
                }
                info!(user_id, "logged in");
                self.events.logged_in(user_id);
            }
            Flag::Registered => self.events.registered(),
            Flag::FetchUsers => {
                let body = envelope
                    .body
                    .as_deref()
                    .ok_or_else(|| ClientError::Protocol("user fetch page without a body".into()))?;
                let page = UserInfo::decode_page(body)
                    .map_err(|err| ClientError::Protocol(format!("user fetch page: {err}")))?;
                let final_page = envelope.is_last_part();
                if final_page {
                    self.state.lock().fetching_users = false;
                }
                let entries = page.len();
                for (i, user) in page.into_iter().enumerate() {
                    self.events.user_listed(user, final_page && i + 1 == entries);
                }
            }
            Flag::Error => {
                let body = envelope
                    .body
                    .as_deref()
                    .ok_or_else(|| ClientError::Protocol("error reply without a body".into()))?;
                let failed = Envelope::decode_error_body(body)
                    .map_err(|err| ClientError::Protocol(format!("error reply: {err}")))?;
                {
                    let mut state = self.state.lock();
                    match failed {
                        Flag::FetchUsers => state.fetching_users = false,
                        Flag::FetchMessages => state.fetching_messages = false,
                        _ => {}
                    }
                }
                warn!(failed = ?failed, "server reported a failed operation");
                self.events.server_error(failed);
                if failed == Flag::LogIn {
                    self.teardown(DisconnectReason::LoginRejected).await;
                }
            }
            Flag::Broadcast => {
                if let Some(body) = envelope.body {
                    self.events.broadcast_received(envelope.from, body);
                }
            }
            Flag::FetchMessages => {
                if envelope.body.is_some() {
                    return Err(ClientError::Protocol(
                        "server fetch-messages reply carried a body".into(),
                    ));
                }
                self.state.lock().fetching_messages = false;
                self.events.history_empty();
            }
            Flag::Shutdown => {
                info!("server is shutting down");
                self.teardown(DisconnectReason::ServerShutdown).await;
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected server flag {other:?}"
                )))
            }
        }
        Ok(())
    }

    /// Peer traffic relayed through the server.
    async fn dispatch_peer(&self, envelope: Envelope) -> Result<(), ClientError> {
        if self.state.lock().phase != Phase::Authenticated {
            return Err(ClientError::Protocol(format!(
                "peer envelope {:?} before authentication",
                envelope.flag
            )));
        }

        match envelope.flag {
            // The opening invite is the one negotiation message handled
            // inline; everything else of the exchange feeds the inbox.
            Flag::ExchangeKeys if envelope.body.as_deref() == Some(&[KEY_EXCHANGE_ASK]) => {
                let now = Instant::now();
                let deadline = now + self.negotiation_timeout;
                let surfaced = {
                    let mut state = self.state.lock();
                    state.expire_stale_invite(now);
                    if state.negotiation_busy() {
                        false
                    } else {
                        state.setting_up_conversation = true;
                        state.pending_invite = Some(PendingInvite {
                            from: envelope.from,
                            deadline,
                        });
                        true
                    }
                };
                if surfaced {
                    info!(from = envelope.from, "conversation invite received");
                    self.events.invite_received(envelope.from);
                } else {
                    debug!(from = envelope.from, "dropping invite while another negotiation is active");
                }
            }
            flag if flag.is_key_exchange() => {
                // Replies for the blocked negotiation call; ignore the send
                // error that can only occur mid-teardown.
                let _ = self.inbox_tx.send(envelope);
            }
            Flag::FileAsk => {
                let surfaced = {
                    let mut state = self.state.lock();
                    state.expire_stale_invite(Instant::now());
                    if state.negotiation_busy() {
                        false
                    } else {
                        state.exchanging_file = true;
                        true
                    }
                };
                if surfaced {
                    if let Some(body) = envelope.body {
                        self.events.file_offer(envelope.from, body);
                    }
                } else {
                    debug!(from = envelope.from, "dropping file offer while another exchange is active");
                }
            }
            Flag::File => {
                if envelope.is_last_part() {
                    self.state.lock().exchanging_file = false;
                }
                if let Some(body) = envelope.body {
                    self.events
                        .file_chunk(envelope.from, envelope.index, envelope.count, body);
                }
            }
            Flag::Proceed => {
                let fetch_in_flight = {
                    let state = self.state.lock();
                    state.fetching_users || state.fetching_messages
                };
                if fetch_in_flight {
                    // Delivery during a fetch is dropped, not queued.
                    warn!(from = envelope.from, "dropping chat message during an in-flight fetch");
                } else if let Some(body) = envelope.body {
                    self.events
                        .message_received(envelope.from, envelope.timestamp, body);
                }
            }
            Flag::FetchMessages => {
                let body = envelope.body.as_deref().ok_or_else(|| {
                    ClientError::Protocol("history page without a body".into())
                })?;
                let last = envelope.is_last_part();
                if last {
                    self.state.lock().fetching_messages = false;
                }
                self.events
                    .history_message(envelope.from, envelope.timestamp, body.to_vec(), last);
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected peer flag {other:?}"
                )))
            }
        }
        Ok(())
    }
}

/// One iteration per frame or timeout tick until the transport dies.
async fn read_loop(inner: Arc<SessionInner>) {
    loop {
        if inner.state.lock().phase == Phase::Disconnected {
            break;
        }
        match inner.channel.receive().await {
            Ok(ReadOutcome::Message(envelope)) => {
                if let Err(err) = inner.dispatch(envelope).await {
                    error!(error = %err, "protocol violation, tearing the session down");
                    inner.teardown(DisconnectReason::ProtocolViolation).await;
                    break;
                }
            }
            Ok(ReadOutcome::Timeout) => continue,
            Ok(ReadOutcome::Disconnected) => {
                inner.teardown(DisconnectReason::TransportLost).await;
                break;
            }
            Err(err) => {
                error!(error = %err, "transport failure");
                inner.teardown(DisconnectReason::ProtocolViolation).await;
                break;
            }
        }
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
