//! Relay connection client.
//!
//! Connects to the relay, runs the peer side of the handshake and then
//! splits the stream so sending and receiving can run concurrently. The two
//! halves share nothing but the session key.

use std::net::SocketAddr;
use std::sync::Arc;

use cryptochat_core::wire::{read_frame, write_frame};
use cryptochat_core::{PeerConfig, ProtocolError, peer_handshake};
use cryptochat_crypto::{FRAME_HEADER_SIZE, SessionKey, decrypt, encrypt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

/// A connection that has completed the handshake.
pub struct PeerSession {
    stream: TcpStream,
    relay_addr: SocketAddr,
    session_key: Arc<SessionKey>,
    max_frame_bytes: usize,
}

impl PeerSession {
    /// Connect to the relay in `config` and establish the session key.
    pub async fn connect(config: &PeerConfig) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(&config.relay_addr).await?;
        Self::handshake(stream, config).await
    }

    /// Run the handshake over an already-connected stream.
    pub async fn handshake(mut stream: TcpStream, config: &PeerConfig) -> Result<Self, ProtocolError> {
        stream.set_nodelay(true)?;
        let relay_addr = stream.peer_addr()?;
        debug!(relay = %relay_addr, "Connected, starting handshake");

        let session_key = peer_handshake(&mut stream, config.handshake_timeout()).await?;
        info!(relay = %relay_addr, "Handshake complete");

        Ok(Self {
            stream,
            relay_addr,
            session_key: Arc::new(session_key),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub const fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    /// The group key received from the relay.
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (ChatSender, ChatReceiver) {
        let (reader, writer) = self.stream.into_split();
        (
            ChatSender {
                writer,
                session_key: Arc::clone(&self.session_key),
                max_frame_bytes: self.max_frame_bytes,
            },
            ChatReceiver {
                reader,
                session_key: self.session_key,
                max_frame_bytes: self.max_frame_bytes,
            },
        )
    }
}

/// Outbound half: encrypts and frames chat messages.
pub struct ChatSender {
    writer: OwnedWriteHalf,
    session_key: Arc<SessionKey>,
    max_frame_bytes: usize,
}

impl ChatSender {
    /// Encrypt `plaintext` under the session key and send it as one frame.
    ///
    /// A message whose frame would exceed the relay's frame limit is refused
    /// with [`ProtocolError::ProtocolViolation`] before anything is written,
    /// so the connection stays usable.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), ProtocolError> {
        let frame_len = FRAME_HEADER_SIZE + plaintext.len();
        if frame_len > self.max_frame_bytes {
            return Err(ProtocolError::ProtocolViolation(format!(
                "message frame of {frame_len} bytes exceeds the {}-byte limit",
                self.max_frame_bytes
            )));
        }
        let frame = encrypt(&*self.session_key, plaintext)?;
        write_frame(&mut self.writer, &frame).await
    }

    /// Close our direction of the connection.
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Inbound half: reads frames and decrypts them.
pub struct ChatReceiver {
    reader: OwnedReadHalf,
    session_key: Arc<SessionKey>,
    max_frame_bytes: usize,
}

impl ChatReceiver {
    /// Wait for the next message.
    ///
    /// [`ProtocolError::AuthenticationFailed`] rejects only the current
    /// frame; framing is intact, so the caller may keep receiving.
    /// [`ProtocolError::PeerDisconnected`] means the relay closed the stream.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let frame = read_frame(&mut self.reader, self.max_frame_bytes).await?;
        Ok(decrypt(&*self.session_key, &frame)?)
    }
}
