//! Symmetric key types.

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of every symmetric key in the protocol.
pub const KEY_SIZE: usize = 32;

/// Anything usable as a ChaCha20-Poly1305 key.
pub trait AeadKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE];
}

/// Per-connection key derived from the handshake's key agreement.
///
/// Only ever used to wrap the [`SessionKey`] on its way to one peer.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TransportKey([u8; KEY_SIZE]);

impl TransportKey {
    pub(crate) const fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AeadKey for TransportKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for TransportKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for TransportKey {}

impl std::fmt::Debug for TransportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportKey([REDACTED])")
    }
}

/// Group key shared by every peer of one relay run.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Generate a fresh random session key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Rebuild a session key from unwrapped bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Raw key bytes, for wrapping under a transport key. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl AeadKey for SessionKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}
