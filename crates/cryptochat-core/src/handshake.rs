//! Key-establishment handshake.
//!
//! ```text
//! peer                                   relay
//!  | -- u32 len || peer public key -------> |
//!  | <------- u32 len || relay public key - |
//!  |   (both derive the transport key)      |
//!  | <-- u32 len || wrapped session key --- |
//! ```
//!
//! Both sides are explicit state machines whose steps consume the previous
//! state, so key material only ever lives in the state that needs it.
//! Any error ends the handshake; there is no retry.

use std::future::Future;
use std::time::Duration;

use cryptochat_crypto::{
    FRAME_HEADER_SIZE, KEY_SIZE, KeyExchangeState, SessionKey, TransportKey,
    TransportKeyExchange, decrypt, encrypt, fingerprint_of,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::ProtocolError;
use crate::wire::{read_frame, read_length_prefixed, write_frame, write_length_prefixed};

/// Serialized size of a wrapped session key frame.
pub const WRAPPED_KEY_FRAME_LEN: usize = FRAME_HEADER_SIZE + KEY_SIZE;

/// Relay-side handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayHandshakeState {
    AwaitingPeerPublicKey,
    KeyAgreed,
    SessionKeySent,
    Active,
}

enum RelayStep<E> {
    AwaitingPeerPublicKey(E),
    KeyAgreed(TransportKey),
    SessionKeySent,
    Active,
}

/// Relay side of one connection's handshake.
pub struct RelayHandshake<'k, E> {
    step: RelayStep<E>,
    session_key: &'k SessionKey,
}

impl<'k, E: TransportKeyExchange> RelayHandshake<'k, E> {
    pub const fn new(exchange: E, session_key: &'k SessionKey) -> Self {
        Self {
            step: RelayStep::AwaitingPeerPublicKey(exchange),
            session_key,
        }
    }

    pub const fn state(&self) -> RelayHandshakeState {
        match self.step {
            RelayStep::AwaitingPeerPublicKey(_) => RelayHandshakeState::AwaitingPeerPublicKey,
            RelayStep::KeyAgreed(_) => RelayHandshakeState::KeyAgreed,
            RelayStep::SessionKeySent => RelayHandshakeState::SessionKeySent,
            RelayStep::Active => RelayHandshakeState::Active,
        }
    }

    /// Perform one transition.
    pub async fn advance<S>(self, stream: &mut S) -> Result<Self, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let step = match self.step {
            RelayStep::AwaitingPeerPublicKey(exchange) => {
                let peer_public = read_length_prefixed(stream, E::MAX_PUBLIC_LEN).await?;
                let ours = exchange.public_bytes();
                // Validates the peer point before we reveal anything.
                let transport_key = exchange.complete(&peer_public)?;
                debug!(peer_key = %fingerprint_of(&peer_public), "Peer public key accepted");
                write_length_prefixed(stream, &ours).await?;
                RelayStep::KeyAgreed(transport_key)
            }
            RelayStep::KeyAgreed(transport_key) => {
                let wrapped = encrypt(&transport_key, self.session_key.as_bytes())?;
                write_frame(stream, &wrapped).await?;
                RelayStep::SessionKeySent
            }
            RelayStep::SessionKeySent | RelayStep::Active => RelayStep::Active,
        };
        let next = Self {
            step,
            session_key: self.session_key,
        };
        debug!(state = ?next.state(), "Relay handshake advanced");
        Ok(next)
    }

    /// Drive the handshake until the connection is active.
    pub async fn run<S>(mut self, stream: &mut S) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while self.state() != RelayHandshakeState::Active {
            self = self.advance(stream).await?;
        }
        Ok(())
    }
}

/// Peer-side handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHandshakeState {
    SendingPublicKey,
    AwaitingPeerPublicKey,
    KeyAgreed,
    AwaitingSessionKey,
    Active,
}

enum PeerStep<E> {
    SendingPublicKey(E),
    AwaitingPeerPublicKey(E),
    KeyAgreed(TransportKey),
    AwaitingSessionKey(TransportKey),
    Active(SessionKey),
}

/// Peer side of the handshake with a relay.
pub struct PeerHandshake<E> {
    step: PeerStep<E>,
}

impl<E: TransportKeyExchange> PeerHandshake<E> {
    pub const fn new(exchange: E) -> Self {
        Self {
            step: PeerStep::SendingPublicKey(exchange),
        }
    }

    pub const fn state(&self) -> PeerHandshakeState {
        match self.step {
            PeerStep::SendingPublicKey(_) => PeerHandshakeState::SendingPublicKey,
            PeerStep::AwaitingPeerPublicKey(_) => PeerHandshakeState::AwaitingPeerPublicKey,
            PeerStep::KeyAgreed(_) => PeerHandshakeState::KeyAgreed,
            PeerStep::AwaitingSessionKey(_) => PeerHandshakeState::AwaitingSessionKey,
            PeerStep::Active(_) => PeerHandshakeState::Active,
        }
    }

    /// Perform one transition.
    pub async fn advance<S>(self, stream: &mut S) -> Result<Self, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let step = match self.step {
            PeerStep::SendingPublicKey(exchange) => {
                write_length_prefixed(stream, &exchange.public_bytes()).await?;
                PeerStep::AwaitingPeerPublicKey(exchange)
            }
            PeerStep::AwaitingPeerPublicKey(exchange) => {
                let relay_public = read_length_prefixed(stream, E::MAX_PUBLIC_LEN).await?;
                let transport_key = exchange.complete(&relay_public)?;
                debug!(relay_key = %fingerprint_of(&relay_public), "Relay public key accepted");
                PeerStep::KeyAgreed(transport_key)
            }
            PeerStep::KeyAgreed(transport_key) => PeerStep::AwaitingSessionKey(transport_key),
            PeerStep::AwaitingSessionKey(transport_key) => {
                let wrapped = read_frame(stream, WRAPPED_KEY_FRAME_LEN).await?;
                let unwrapped = Zeroizing::new(decrypt(&transport_key, &wrapped)?);
                if unwrapped.len() != KEY_SIZE {
                    return Err(ProtocolError::ProtocolViolation(format!(
                        "wrapped session key is {} bytes, expected {KEY_SIZE}",
                        unwrapped.len()
                    )));
                }
                PeerStep::Active(SessionKey::from_bytes(&unwrapped)?)
            }
            PeerStep::Active(session_key) => PeerStep::Active(session_key),
        };
        let next = Self { step };
        debug!(state = ?next.state(), "Peer handshake advanced");
        Ok(next)
    }

    /// Drive the handshake to completion and return the session key.
    pub async fn run<S>(mut self, stream: &mut S) -> Result<SessionKey, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            self = match self.step {
                PeerStep::Active(session_key) => return Ok(session_key),
                step => Self { step }.advance(stream).await?,
            };
        }
    }
}

/// Bound a handshake future by `limit`.
pub async fn with_handshake_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout(limit))?
}

/// Run the relay side with a fresh P-256 exchange and a deadline.
pub async fn relay_handshake<S>(
    stream: &mut S,
    session_key: &SessionKey,
    limit: Duration,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_handshake_timeout(
        limit,
        RelayHandshake::new(KeyExchangeState::new(), session_key).run(stream),
    )
    .await
}

/// Run the peer side with a fresh P-256 exchange and a deadline.
pub async fn peer_handshake<S>(stream: &mut S, limit: Duration) -> Result<SessionKey, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_handshake_timeout(limit, PeerHandshake::new(KeyExchangeState::new()).run(stream)).await
}
