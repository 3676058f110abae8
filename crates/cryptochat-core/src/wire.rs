//! Length-prefixed framing over a byte stream.
//!
//! Every unit on the wire is `u32 BE length || payload`. Handshake fields
//! and chat frames use the same framing, so a TCP read boundary never has to
//! line up with a message boundary.

use cryptochat_crypto::{EncryptedFrame, FRAME_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Read the 4-byte length prefix.
///
/// EOF before the first byte is a clean [`ProtocolError::PeerDisconnected`];
/// EOF partway through the prefix is a protocol violation.
async fn read_prefix<R: AsyncRead + Unpin>(reader: &mut R) -> Result<[u8; 4], ProtocolError> {
    let mut buf = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                ProtocolError::PeerDisconnected
            } else {
                ProtocolError::ProtocolViolation(format!(
                    "stream closed after {filled} of {LENGTH_PREFIX_SIZE} length-prefix bytes"
                ))
            });
        }
        filled += n;
    }
    Ok(buf)
}

fn check_len(len: usize, min: usize, max: usize) -> Result<(), ProtocolError> {
    if len < min || len > max {
        return Err(ProtocolError::ProtocolViolation(format!(
            "declared length {len} outside allowed range {min}..={max}"
        )));
    }
    Ok(())
}

async fn read_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ProtocolViolation(format!(
                "stream closed before {} declared payload bytes arrived",
                buf.len()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read one length-prefixed payload of at most `max_len` bytes.
pub async fn read_length_prefixed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::from_be_bytes(read_prefix(reader).await?) as usize;
    check_len(len, 0, max_len)?;

    let mut data = vec![0u8; len];
    read_body(reader, &mut data).await?;
    Ok(data)
}

/// Write one length-prefixed payload and flush.
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    writer.write_all(&encode_length_prefixed(data)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Prefix `data` with its length, as it appears on the wire.
pub fn encode_length_prefixed(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(data.len()).map_err(|_| {
        ProtocolError::ProtocolViolation(format!(
            "payload of {} bytes does not fit a u32 length prefix",
            data.len()
        ))
    })?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + data.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// Read one chat frame as raw wire bytes, prefix included.
///
/// Only the declared length is checked; the payload stays opaque. Used by
/// the relay, which forwards these bytes verbatim.
pub async fn read_raw_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_len: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let prefix = read_prefix(reader).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    check_len(len, FRAME_HEADER_SIZE, max_frame_len)?;

    let mut unit = vec![0u8; LENGTH_PREFIX_SIZE + len];
    unit[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
    read_body(reader, &mut unit[LENGTH_PREFIX_SIZE..]).await?;
    Ok(unit)
}

/// Read and parse one [`EncryptedFrame`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_len: usize,
) -> Result<EncryptedFrame, ProtocolError> {
    let body = read_length_prefixed(reader, max_frame_len).await?;
    Ok(EncryptedFrame::from_bytes(&body)?)
}

/// Serialize and write one [`EncryptedFrame`].
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &EncryptedFrame,
) -> Result<(), ProtocolError> {
    write_length_prefixed(writer, &frame.to_bytes()?).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cryptochat_crypto::{NONCE_SIZE, TAG_SIZE};
    use tokio::io::duplex;

    fn sample_frame(ciphertext: &[u8]) -> EncryptedFrame {
        EncryptedFrame {
            ciphertext: ciphertext.to_vec(),
            nonce: [1u8; NONCE_SIZE],
            tag: [2u8; TAG_SIZE],
        }
    }

    #[tokio::test]
    async fn length_prefix_is_big_endian() {
        let encoded = encode_length_prefixed(b"abc").unwrap();
        assert_eq!(encoded, [0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn payload_survives_split_writes() {
        let (mut a, mut b) = duplex(64);
        let encoded = encode_length_prefixed(b"hello world").unwrap();

        let writer = tokio::spawn(async move {
            for chunk in encoded.chunks(3) {
                a.write_all(chunk).await.unwrap();
                a.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let got = read_length_prefixed(&mut b, 1024).await.unwrap();
        writer.await.unwrap();
        assert_eq!(got, b"hello world");
    }

    #[tokio::test]
    async fn coalesced_frames_are_separated() {
        let (mut a, mut b) = duplex(1024);
        let mut both = Vec::new();
        for text in [&b"first"[..], &b"second"[..]] {
            let body = sample_frame(text).to_bytes().unwrap();
            both.extend(encode_length_prefixed(&body).unwrap());
        }
        a.write_all(&both).await.unwrap();

        let first = read_frame(&mut b, 1024).await.unwrap();
        let second = read_frame(&mut b, 1024).await.unwrap();
        assert_eq!(first.ciphertext, b"first");
        assert_eq!(second.ciphertext, b"second");
    }

    #[tokio::test]
    async fn clean_eof_is_disconnect() {
        let (a, mut b) = duplex(64);
        drop(a);
        let result = read_length_prefixed(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::PeerDisconnected)));
    }

    #[tokio::test]
    async fn eof_inside_prefix_is_violation() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);
        let result = read_length_prefixed(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn eof_inside_body_is_violation() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0, 0, 0, 10, 1, 2, 3]).await.unwrap();
        drop(a);
        let result = read_length_prefixed(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_reading_body() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let result = read_length_prefixed(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn raw_frame_keeps_prefix_verbatim() {
        let (mut a, mut b) = duplex(1024);
        let frame = sample_frame(b"opaque");
        write_frame(&mut a, &frame).await.unwrap();

        let raw = read_raw_frame(&mut b, 1024).await.unwrap();
        assert_eq!(raw, encode_length_prefixed(&frame.to_bytes().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn raw_frame_shorter_than_header_is_rejected() {
        let (mut a, mut b) = duplex(64);
        write_length_prefixed(&mut a, &[0u8; 8]).await.unwrap();
        let result = read_raw_frame(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn garbage_frame_body_is_violation() {
        let (mut a, mut b) = duplex(128);
        write_length_prefixed(&mut a, &[0u8; FRAME_HEADER_SIZE + 5]).await.unwrap();
        let result = read_frame(&mut b, 1024).await;
        assert!(matches!(result, Err(ProtocolError::ProtocolViolation(_))));
    }
}
