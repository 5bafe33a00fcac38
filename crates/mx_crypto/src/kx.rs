//! X25519 key agreement with a client/server role split.
//!
//! Both ends derive the same two 32-byte keys but name them from their own
//! perspective: the client's `rx` is the server's `tx` and vice versa. The
//! transport handshake uses the roles literally; the conversation overlay
//! reuses them with the invite initiator in the server seat.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const PUBLIC_KEY_SIZE: usize = 32;

const KX_SALT: &[u8] = b"mx-transport-kx-v1";

/// Ephemeral X25519 keypair; one per connection or negotiation round.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }
}

/// Directional session keys. Drop clears both halves.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Decrypts traffic from the peer.
    pub rx: [u8; 32],
    /// Encrypts traffic to the peer.
    pub tx: [u8; 32],
}

/// Client-role derivation against the server's public key.
pub fn client_session_keys(
    own: &KeyPair,
    server_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SessionKeys, CryptoError> {
    let (to_client, to_server) = derive_pair(own, server_pk, &own.public_bytes(), server_pk)?;
    Ok(SessionKeys { rx: to_client, tx: to_server })
}

/// Server-role derivation against the client's public key.
pub fn server_session_keys(
    own: &KeyPair,
    client_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SessionKeys, CryptoError> {
    let (to_client, to_server) = derive_pair(own, client_pk, client_pk, &own.public_bytes())?;
    Ok(SessionKeys { rx: to_server, tx: to_client })
}

/// Derive the (server-to-client, client-to-server) key pair. The transcript
/// binds both public keys in client-then-server order so the two roles
/// expand identical material.
fn derive_pair(
    own: &KeyPair,
    peer_pk: &[u8; PUBLIC_KEY_SIZE],
    client_pk: &[u8; PUBLIC_KEY_SIZE],
    server_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let peer = PublicKey::from(*peer_pk);
    let shared = own.secret.diffie_hellman(&peer);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPeerKey);
    }

    let mut ikm = Vec::with_capacity(32 + 2 * PUBLIC_KEY_SIZE);
    ikm.extend_from_slice(shared.as_bytes());
    ikm.extend_from_slice(client_pk);
    ikm.extend_from_slice(server_pk);

    let hk = Hkdf::<Sha256>::new(Some(KX_SALT), &ikm);
    let mut to_client = [0u8; 32];
    let mut to_server = [0u8; 32];
    hk.expand(b"server-to-client", &mut to_client)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"client-to-server", &mut to_server)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    ikm.zeroize();

    Ok((to_client, to_server))
}
