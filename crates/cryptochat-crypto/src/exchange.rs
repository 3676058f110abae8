//! Key agreement.
//!
//! Each side of a connection generates an ephemeral P-256 keypair, sends
//! the SEC1-encoded public point, performs ECDH against the peer's point
//! and derives a per-connection [`TransportKey`] via HKDF-SHA256.
//!
//! Peer points are decoded with full curve validation before any scalar
//! multiplication happens, so off-curve and identity encodings are
//! rejected up front.

use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::{EncodedPoint, PublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::keys::{KEY_SIZE, TransportKey};

/// HKDF info string for transport key derivation.
const HKDF_INFO: &[u8] = b"cryptochat-transport-key-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"cryptochat-hkdf-salt-v1";

/// Length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_SIZE: usize = 65;

/// An ephemeral P-256 keypair.
///
/// Generated fresh for every connection and consumed by [`KeyPair::derive`],
/// so the private scalar cannot outlive the agreement it was made for.
pub struct KeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public point as uncompressed SEC1 bytes (65 bytes).
    pub fn public_bytes(&self) -> Vec<u8> {
        EncodedPoint::from(self.public).as_bytes().to_vec()
    }

    /// Perform ECDH with a peer's SEC1-encoded public key.
    ///
    /// The peer key is validated before use; anything that is not a
    /// non-identity point on P-256 fails with [`CryptoError::InvalidPeerKey`].
    pub fn derive(self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer = decode_public_key(peer_public)?;
        Ok(SharedSecret(self.secret.diffie_hellman(&peer)))
    }
}

/// Raw ECDH output.
///
/// Never usable as a key directly; the only way out is
/// [`SharedSecret::into_transport_key`]. The inner value zeroizes on drop.
pub struct SharedSecret(p256::ecdh::SharedSecret);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

impl SharedSecret {
    /// Hash the agreement output down to a 32-byte transport key.
    pub fn into_transport_key(self) -> Result<TransportKey, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), self.0.raw_secret_bytes().as_slice());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(TransportKey::from_array(key))
    }

    #[cfg(test)]
    fn raw_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.0.raw_secret_bytes().as_slice());
        out
    }
}

/// Decode and validate a SEC1-encoded P-256 public key.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.is_empty() || bytes.len() > PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidPeerKey(format!(
            "unexpected encoding length {}",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| CryptoError::InvalidPeerKey("not a valid P-256 point".into()))
}

/// A pluggable transport-key establishment step.
///
/// The handshake only needs to send some public material, receive the
/// peer's, and end up with a [`TransportKey`]. ECDH over P-256 is the
/// shipped implementation.
pub trait TransportKeyExchange {
    /// Upper bound on the peer's public material, checked before reading it.
    const MAX_PUBLIC_LEN: usize;

    /// Our public material to send to the peer.
    fn public_bytes(&self) -> Vec<u8>;

    /// Finish the exchange with the peer's public material.
    fn complete(self, peer_public: &[u8]) -> Result<TransportKey, CryptoError>;
}

/// State of a key exchange in progress.
#[derive(Debug)]
pub struct KeyExchangeState {
    keypair: KeyPair,
}

impl Default for KeyExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchangeState {
    /// Start a new key exchange by generating an ephemeral keypair.
    pub fn new() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }
}

impl TransportKeyExchange for KeyExchangeState {
    const MAX_PUBLIC_LEN: usize = PUBLIC_KEY_SIZE;

    fn public_bytes(&self) -> Vec<u8> {
        self.keypair.public_bytes()
    }

    fn complete(self, peer_public: &[u8]) -> Result<TransportKey, CryptoError> {
        self.keypair.derive(peer_public)?.into_transport_key()
    }
}

/// Human-readable SHA-256 fingerprint of public key bytes.
///
/// Hex of the first 8 digest bytes; safe to log.
pub fn fingerprint_of(public_bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(public_bytes)[..8])
}

/// Run both halves of a key exchange in memory.
///
/// Returns the transport keys each side ends up with.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange() -> Result<(TransportKey, TransportKey), CryptoError> {
    let client_state = KeyExchangeState::new();
    let server_state = KeyExchangeState::new();

    let client_pub = client_state.public_bytes();
    let server_pub = server_state.public_bytes();

    let client_key = client_state.complete(&server_pub)?;
    let server_key = server_state.complete(&client_pub)?;

    Ok((client_key, server_key))
}
