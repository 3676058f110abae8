//! AEAD codec.
//!
//! ChaCha20-Poly1305 with detached tags. Every call to [`encrypt`] draws a
//! fresh 12-byte nonce from the OS RNG, so nonce uniqueness never depends
//! on counter state surviving a restart.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;
use crate::frame::{EncryptedFrame, NONCE_SIZE, TAG_SIZE};
use crate::keys::AeadKey;

fn cipher_for<K: AeadKey + ?Sized>(key: &K) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.key_bytes()))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt<K: AeadKey + ?Sized>(
    key: &K,
    plaintext: &[u8],
) -> Result<EncryptedFrame, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher_for(key)
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut ciphertext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(EncryptedFrame {
        ciphertext,
        nonce,
        tag: tag_bytes,
    })
}

/// Verify and decrypt `frame` under `key`.
///
/// Any tag mismatch is [`CryptoError::AuthenticationFailed`]; no partial
/// plaintext is ever returned.
pub fn decrypt<K: AeadKey + ?Sized>(
    key: &K,
    frame: &EncryptedFrame,
) -> Result<Vec<u8>, CryptoError> {
    let mut plaintext = frame.ciphertext.clone();
    cipher_for(key)
        .decrypt_in_place_detached(
            Nonce::from_slice(&frame.nonce),
            b"",
            &mut plaintext,
            Tag::from_slice(&frame.tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(plaintext)
}
