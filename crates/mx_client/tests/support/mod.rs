//! In-test server: the server side of the transport bootstrap, token
//! issuance, and an envelope relay, driven over real TCP sockets.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use mx_client::{ClientConfig, DisconnectReason, SessionEvents};
use mx_crypto::{
    server_session_keys, KeyPair, PullStream, PushStream, SigningIdentity, PUBLIC_KEY_SIZE,
    STREAM_HEADER_SIZE,
};
use mx_proto::{
    Envelope, Flag, Token, UserInfo, ANONYMOUS_TOKEN, SERVER_ID, TOKEN_PAYLOAD_SIZE, TOKEN_SIZE,
    UNSIGNED_TOKEN,
};

pub struct TestServer {
    pub identity: SigningIdentity,
    listener: TcpListener,
    pub addr: String,
}

impl TestServer {
    pub async fn bind() -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            identity: SigningIdentity::generate(),
            listener,
            addr,
        })
    }

    /// Client config pinned to this server, with timeouts tightened for
    /// tests.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.addr, self.identity.public_bytes());
        config.read_timeout = Duration::from_millis(50);
        config.negotiation_timeout = Duration::from_secs(5);
        config
    }

    /// Accept one connection and complete the server handshake role.
    pub async fn accept(&self) -> anyhow::Result<ServerLink> {
        let (stream, _) = self.listener.accept().await?;
        ServerLink::handshake(stream, &self.identity).await
    }

    /// Accept one connection but answer it with the all-zero key signal.
    pub async fn accept_refusing(&self) -> anyhow::Result<()> {
        let (mut stream, _) = self.listener.accept().await?;
        let zero = [0u8; PUBLIC_KEY_SIZE];
        let signature = self.identity.sign(&zero);
        stream.write_all(&signature).await?;
        stream.write_all(&zero).await?;
        Ok(())
    }
}

pub struct LinkReader {
    half: OwnedReadHalf,
    pull: PullStream,
}

impl LinkReader {
    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        let mut len_buf = [0u8; 4];
        self.half.read_exact(&mut len_buf).await?;
        let mut frame = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        self.half.read_exact(&mut frame).await?;
        Ok(Envelope::decode(&self.pull.pull(&frame)?)?)
    }
}

pub struct LinkWriter {
    half: OwnedWriteHalf,
    push: PushStream,
}

impl LinkWriter {
    pub async fn send(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        let ciphertext = self.push.push(&envelope.encode()?)?;
        self.half
            .write_all(&(ciphertext.len() as u32).to_le_bytes())
            .await?;
        self.half.write_all(&ciphertext).await?;
        Ok(())
    }
}

/// One accepted client connection, post-handshake.
pub struct ServerLink {
    pub reader: LinkReader,
    pub writer: LinkWriter,
}

impl ServerLink {
    /// Server role of the transport bootstrap, mirroring the client steps.
    pub async fn handshake(
        mut stream: TcpStream,
        identity: &SigningIdentity,
    ) -> anyhow::Result<Self> {
        let keypair = KeyPair::generate();
        let public = keypair.public_bytes();
        let signature = identity.sign(&public);
        stream.write_all(&signature).await?;
        stream.write_all(&public).await?;

        let mut client_pk = [0u8; PUBLIC_KEY_SIZE];
        stream.read_exact(&mut client_pk).await?;
        let keys = server_session_keys(&keypair, &client_pk)?;

        let (push, header) = PushStream::new(&keys.tx)?;
        let signature = identity.sign(&header);
        stream.write_all(&signature).await?;
        stream.write_all(&header).await?;

        let mut client_header = [0u8; STREAM_HEADER_SIZE];
        stream.read_exact(&mut client_header).await?;
        let pull = PullStream::new(&keys.rx, &client_header)?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: LinkReader { half: read_half, pull },
            writer: LinkWriter { half: write_half, push },
        })
    }

    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        self.reader.recv().await
    }

    pub async fn send(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        self.writer.send(envelope).await
    }

    pub fn split(self) -> (LinkReader, LinkWriter) {
        (self.reader, self.writer)
    }
}

/// `payload(16) | Ed25519 signature(64)` by the server identity.
pub fn issue_token(identity: &SigningIdentity, payload: &[u8; TOKEN_PAYLOAD_SIZE]) -> Token {
    let mut token = [0u8; TOKEN_SIZE];
    token[..TOKEN_PAYLOAD_SIZE].copy_from_slice(payload);
    token[TOKEN_PAYLOAD_SIZE..].copy_from_slice(&identity.sign(payload));
    token
}

/// The token server control messages carry.
pub fn control_token(identity: &SigningIdentity) -> Token {
    issue_token(identity, &UNSIGNED_TOKEN)
}

/// A server-originated control envelope with a properly signed token.
pub fn server_envelope(
    identity: &SigningIdentity,
    flag: Flag,
    to: u32,
    index: u32,
    count: u32,
    body: Option<Vec<u8>>,
) -> Envelope {
    Envelope {
        flag,
        timestamp: 1,
        index,
        count,
        from: SERVER_ID,
        to,
        token: control_token(identity),
        body,
    }
}

/// A relayed peer envelope. Peer traffic carries whatever token the peer
/// held; the dispatcher never verifies it.
pub fn peer_envelope(flag: Flag, from: u32, to: u32, body: Option<Vec<u8>>) -> Envelope {
    Envelope {
        flag,
        timestamp: 1,
        index: 0,
        count: 1,
        from,
        to,
        token: ANONYMOUS_TOKEN,
        body,
    }
}

pub fn named_user(id: u32, name: &str, connected: bool) -> UserInfo {
    let mut padded = [0u8; mx_proto::USERNAME_SIZE];
    padded[..name.len()].copy_from_slice(name.as_bytes());
    UserInfo {
        id,
        connected,
        name: padded,
    }
}

/// Serve the LOG_IN request on `link` and answer LOGGED_IN assigning
/// `user_id`. Returns the issued session token.
pub async fn complete_login(
    link: &mut ServerLink,
    identity: &SigningIdentity,
    user_id: u32,
) -> anyhow::Result<Token> {
    let request = link.recv().await?;
    anyhow::ensure!(request.flag == Flag::LogIn, "expected LOG_IN, got {:?}", request.flag);
    let body = request.body.as_deref().unwrap_or_default();
    mx_proto::Credentials::decode(body)?;

    let token = issue_token(identity, b"issued-session-t");
    link.send(&Envelope {
        flag: Flag::LoggedIn,
        timestamp: 1,
        index: 0,
        count: 1,
        from: SERVER_ID,
        to: user_id,
        token,
        body: None,
    })
    .await?;
    Ok(token)
}

/// Forward every envelope from one client to another until either side
/// goes away.
pub async fn relay(mut from: LinkReader, mut to: LinkWriter) {
    while let Ok(envelope) = from.recv().await {
        if to.send(&envelope).await.is_err() {
            break;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected(DisconnectReason),
    LoggedIn(u32),
    Registered,
    ServerError(Flag),
    UserListed(UserInfo, bool),
    Message { from: u32, body: Vec<u8> },
    History { from: u32, body: Vec<u8>, last: bool },
    HistoryEmpty,
    Broadcast { from: u32, body: Vec<u8> },
    Invite(u32),
    FileOffer { from: u32, name: Vec<u8> },
    FileChunk { from: u32, index: u32, count: u32 },
}

/// Event sink that records everything for assertions.
#[derive(Default)]
pub struct RecordingEvents {
    log: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.log.lock().contains(event)
    }

    pub fn invites(&self) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Invite(from) => Some(*from),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.log.lock().push(event);
    }
}

impl SessionEvents for RecordingEvents {
    fn connected(&self) {
        self.record(Event::Connected);
    }

    fn disconnected(&self, reason: DisconnectReason) {
        self.record(Event::Disconnected(reason));
    }

    fn logged_in(&self, user_id: u32) {
        self.record(Event::LoggedIn(user_id));
    }

    fn registered(&self) {
        self.record(Event::Registered);
    }

    fn server_error(&self, failed: Flag) {
        self.record(Event::ServerError(failed));
    }

    fn user_listed(&self, user: UserInfo, last: bool) {
        self.record(Event::UserListed(user, last));
    }

    fn message_received(&self, from: u32, _timestamp: i64, body: Vec<u8>) {
        self.record(Event::Message { from, body });
    }

    fn history_message(&self, from: u32, _timestamp: i64, body: Vec<u8>, last: bool) {
        self.record(Event::History { from, body, last });
    }

    fn history_empty(&self) {
        self.record(Event::HistoryEmpty);
    }

    fn broadcast_received(&self, from: u32, body: Vec<u8>) {
        self.record(Event::Broadcast { from, body });
    }

    fn invite_received(&self, from: u32) {
        self.record(Event::Invite(from));
    }

    fn file_offer(&self, from: u32, name: Vec<u8>) {
        self.record(Event::FileOffer { from, name });
    }

    fn file_chunk(&self, from: u32, index: u32, count: u32, _data: Vec<u8>) {
        self.record(Event::FileChunk { from, index, count });
    }
}

/// Poll `condition` until it holds or a generous deadline lapses.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
