//! Binary serialization of [`EncryptedFrame`].
//!
//! Layout: `nonce (12) || tag (16) || u32 BE ciphertext length || ciphertext`.
//! Fixed-width fields first, so nothing inside the payload can be mistaken
//! for a field boundary.

use crate::error::CryptoError;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Bytes preceding the ciphertext in the serialized form.
pub const FRAME_HEADER_SIZE: usize = NONCE_SIZE + TAG_SIZE + 4;

/// One encrypted message or wrapped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl EncryptedFrame {
    /// Length of [`EncryptedFrame::to_bytes`] output.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.ciphertext.len()
    }

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let ct_len = u32::try_from(self.ciphertext.len()).map_err(|_| {
            CryptoError::MalformedFrame(format!(
                "ciphertext of {} bytes does not fit a u32 length",
                self.ciphertext.len()
            ))
        })?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&ct_len.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Parse the wire layout. The input must contain exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(CryptoError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {FRAME_HEADER_SIZE}-byte header",
                bytes.len()
            )));
        }
        let (nonce_bytes, rest) = bytes.split_at(NONCE_SIZE);
        let (tag_bytes, rest) = rest.split_at(TAG_SIZE);
        let (len_bytes, ciphertext) = rest.split_at(4);

        let mut len_arr = [0u8; 4];
        len_arr.copy_from_slice(len_bytes);
        let declared = u32::from_be_bytes(len_arr) as usize;
        if declared != ciphertext.len() {
            return Err(CryptoError::MalformedFrame(format!(
                "declared ciphertext length {declared} but {} bytes follow",
                ciphertext.len()
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            nonce,
            tag,
        })
    }
}
