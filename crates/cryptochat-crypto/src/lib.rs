//! `CryptoChat` crypto primitives
//!
//! Everything the relay and its peers need to agree on keys and protect
//! chat traffic, with no I/O.
//!
//! ## Crypto primitives
//!
//! - **Key agreement**: ephemeral P-256 ECDH per connection → HKDF-SHA256 → transport key
//! - **Session key**: 32 random bytes per relay run, wrapped under each transport key
//! - **Encryption**: ChaCha20-Poly1305 AEAD, random 12-byte nonce, detached 16-byte tag

pub mod aead;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{
    KeyExchangeState, KeyPair, PUBLIC_KEY_SIZE, SharedSecret, TransportKeyExchange,
    fingerprint_of,
};
pub use frame::{EncryptedFrame, FRAME_HEADER_SIZE, NONCE_SIZE, TAG_SIZE};
pub use keys::{AeadKey, KEY_SIZE, SessionKey, TransportKey};
