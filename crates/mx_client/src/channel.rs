//! The authenticated-encryption wrapper around the raw socket to the server.
//!
//! One `SecureChannel` owns one TCP connection for its whole lifetime. The
//! bootstrap authenticates the server against the pinned signing key,
//! agrees ephemeral session keys, and brings up one ordered stream per
//! direction. After that every unit on the socket is
//! `u32 LE ciphertext length | ciphertext`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use mx_crypto::{
    client_session_keys, KeyPair, PullStream, PushStream, ServerVerifier, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE, STREAM_HEADER_SIZE,
};
use mx_proto::{Envelope, MAX_MESSAGE_SIZE};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Poly1305 tag appended to every ciphertext.
const TAG_SIZE: usize = 16;

/// Largest ciphertext a well-behaved peer can produce.
const MAX_FRAME_SIZE: usize = MAX_MESSAGE_SIZE + TAG_SIZE;

/// Classified result of one `receive` poll.
#[derive(Debug)]
pub enum ReadOutcome {
    Message(Envelope),
    /// No data arrived within the read timeout; the connection is alive.
    Timeout,
    /// EOF or any other I/O condition. The session must tear down.
    Disconnected,
}

struct WriteState {
    half: OwnedWriteHalf,
    push: PushStream,
}

struct ReadState {
    half: OwnedReadHalf,
    pull: PullStream,
}

/// Encrypted, ordered message stream over one TCP connection.
///
/// The write path is shared by every operation and serialized under its
/// own lock; the read path belongs to the session's read loop.
pub struct SecureChannel {
    writer: Mutex<WriteState>,
    reader: Mutex<ReadState>,
    read_timeout: Duration,
}

impl SecureChannel {
    /// Connect and run the transport bootstrap. Any failure aborts the
    /// connection; retrying means a fresh socket and a fresh channel.
    pub async fn connect(
        config: &ClientConfig,
        verifier: &ServerVerifier,
    ) -> Result<Self, ClientError> {
        let connect_and_shake = async {
            let stream = TcpStream::connect(&config.server_addr).await?;
            stream.set_nodelay(true).ok();
            client_handshake(stream, verifier).await
        };
        let (reader, writer) = timeout(config.handshake_timeout, connect_and_shake)
            .await
            .map_err(|_| ClientError::Transport("handshake timed out".into()))??;

        debug!(server = %config.server_addr, "secure channel established");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            read_timeout: config.read_timeout,
        })
    }

    /// Encrypt and write one frame. I/O errors are swallowed: the write
    /// degrades to "not sent" and teardown is left to the read loop.
    pub async fn send(&self, plain: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        let ciphertext = match writer.push.push(plain) {
            Ok(ct) => ct,
            Err(err) => {
                warn!(error = %err, "transport encrypt failed");
                return false;
            }
        };
        let mut frame = Vec::with_capacity(4 + ciphertext.len());
        frame.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        frame.extend_from_slice(&ciphertext);
        match writer.half.write_all(&frame).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "socket write failed");
                false
            }
        }
    }

    /// Poll for one inbound envelope.
    ///
    /// A timeout with no data is [`ReadOutcome::Timeout`]; EOF and every
    /// other I/O condition is [`ReadOutcome::Disconnected`]. Decryption or
    /// decode failure after a complete frame is a fatal protocol violation.
    pub async fn receive(&self) -> Result<ReadOutcome, ClientError> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        match timeout(self.read_timeout, reader.half.read_exact(&mut len_buf)).await {
            Err(_) => return Ok(ReadOutcome::Timeout),
            Ok(Err(err)) => {
                debug!(error = %err, "socket read ended");
                return Ok(ReadOutcome::Disconnected);
            }
            Ok(Ok(_)) => {}
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(ClientError::Protocol(format!(
                "frame length {len} outside 1..={MAX_FRAME_SIZE}"
            )));
        }

        let mut frame = vec![0u8; len];
        match timeout(self.read_timeout, reader.half.read_exact(&mut frame)).await {
            Err(_) => {
                debug!("frame body never arrived");
                return Ok(ReadOutcome::Disconnected);
            }
            Ok(Err(err)) => {
                debug!(error = %err, "socket read ended mid-frame");
                return Ok(ReadOutcome::Disconnected);
            }
            Ok(Ok(_)) => {}
        }

        let plain = reader
            .pull
            .pull(&frame)
            .map_err(|err| ClientError::Protocol(format!("transport decrypt: {err}")))?;
        let envelope = Envelope::decode(&plain)
            .map_err(|err| ClientError::Protocol(format!("transport decode: {err}")))?;
        Ok(ReadOutcome::Message(envelope))
    }

    /// Half-close the socket so the server sees the session end promptly.
    pub async fn shutdown(&self) {
        if let Err(err) = self.writer.lock().await.half.shutdown().await {
            debug!(error = %err, "socket shutdown failed");
        }
    }
}

/// Client role of the transport bootstrap.
///
/// 1. Read `signature(64) | server ephemeral key(32)`, verify, and treat
///    the all-zero key as a refusal signal.
/// 2. Agree session keys and send our ephemeral key in the clear.
/// 3. Read `signature(64) | stream header(24)`, verify, seed the pull side.
/// 4. Seed the push side and send its header.
async fn client_handshake(
    mut stream: TcpStream,
    verifier: &ServerVerifier,
) -> Result<(ReadState, WriteState), ClientError> {
    let mut signed_key = [0u8; SIGNATURE_SIZE + PUBLIC_KEY_SIZE];
    stream.read_exact(&mut signed_key).await?;
    let signature: [u8; SIGNATURE_SIZE] = signed_key[..SIGNATURE_SIZE]
        .try_into()
        .expect("signature slice");
    let server_pk: [u8; PUBLIC_KEY_SIZE] = signed_key[SIGNATURE_SIZE..]
        .try_into()
        .expect("key slice");
    verifier
        .verify(&server_pk, &signature)
        .map_err(|_| ClientError::AuthenticationFailed)?;
    if server_pk == [0u8; PUBLIC_KEY_SIZE] {
        return Err(ClientError::ServerRefused);
    }

    let keypair = KeyPair::generate();
    let keys = client_session_keys(&keypair, &server_pk)
        .map_err(|err| ClientError::Transport(format!("key agreement: {err}")))?;
    stream.write_all(&keypair.public_bytes()).await?;

    let mut signed_header = [0u8; SIGNATURE_SIZE + STREAM_HEADER_SIZE];
    stream.read_exact(&mut signed_header).await?;
    let signature: [u8; SIGNATURE_SIZE] = signed_header[..SIGNATURE_SIZE]
        .try_into()
        .expect("signature slice");
    let header: [u8; STREAM_HEADER_SIZE] = signed_header[SIGNATURE_SIZE..]
        .try_into()
        .expect("header slice");
    verifier
        .verify(&header, &signature)
        .map_err(|_| ClientError::AuthenticationFailed)?;
    let pull = PullStream::new(&keys.rx, &header)
        .map_err(|err| ClientError::Transport(format!("pull stream: {err}")))?;

    let (push, own_header) = PushStream::new(&keys.tx)
        .map_err(|err| ClientError::Transport(format!("push stream: {err}")))?;
    stream.write_all(&own_header).await?;

    let (read_half, write_half) = stream.into_split();
    Ok((
        ReadState { half: read_half, pull },
        WriteState { half: write_half, push },
    ))
}
