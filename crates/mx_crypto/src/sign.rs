//! Ed25519 signing identities and pinned-key verification.
//!
//! The client never signs anything on the transport link; it only verifies
//! the server's signatures against a statically pinned public key.
//! [`SigningIdentity`] is the issuing half, used wherever the server role
//! is embedded (and by the test harnesses).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Raw Ed25519 signature length.
pub const SIGNATURE_SIZE: usize = 64;

/// A pinned Ed25519 verifying key.
#[derive(Clone)]
pub struct ServerVerifier {
    key: VerifyingKey,
}

impl ServerVerifier {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8; SIGNATURE_SIZE]) -> Result<(), CryptoError> {
        let sig = Signature::from_bytes(sig);
        self.key
            .verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.key.to_bytes()[..8])
    }
}

impl std::fmt::Debug for ServerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServerVerifier({})", self.fingerprint())
    }
}

/// The signing half. Drop clears the secret via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct SigningIdentity {
    secret_bytes: [u8; 32],
}

impl SigningIdentity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            secret_bytes: signing_key.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("signing key must be 32 bytes".into()))?;
        Ok(Self { secret_bytes })
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key().verifying_key().to_bytes()
    }

    pub fn verifier(&self) -> ServerVerifier {
        ServerVerifier {
            key: self.signing_key().verifying_key(),
        }
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key().sign(msg).to_bytes()
    }
}
