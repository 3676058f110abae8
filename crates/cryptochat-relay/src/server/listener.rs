//! TCP accept loop with admission control.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use cryptochat_core::RelayConfig;
use cryptochat_crypto::SessionKey;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::error::RelayError;
use super::handler::ConnectionHandler;
use crate::registry::PeerRegistry;

/// A bound relay, ready to serve.
pub struct Relay {
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
    session_key: Arc<SessionKey>,
    config: Arc<RelayConfig>,
}

impl Relay {
    /// Validate `config`, bind the listener and generate this run's session key.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let listener =
            TcpListener::bind(config.listen_addr)
                .await
                .map_err(|source| RelayError::Bind {
                    addr: config.listen_addr,
                    source,
                })?;
        let session_key = Arc::new(SessionKey::generate());
        info!(
            addr = %listener.local_addr()?,
            capacity = config.capacity,
            "Relay listening, session key generated"
        );
        Ok(Self {
            listener,
            registry: Arc::new(PeerRegistry::new(config.capacity)),
            session_key,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.registry)
    }

    /// The session key handed to every peer during this run.
    pub fn session_key(&self) -> Arc<SessionKey> {
        Arc::clone(&self.session_key)
    }

    /// Serve until the process is stopped.
    pub async fn serve(self) -> Result<(), RelayError> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then close every peer.
    ///
    /// A failure on one connection never ends this loop.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let handler = ConnectionHandler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.session_key),
            Arc::clone(&self.config),
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    match self.registry.try_reserve() {
                        Ok(reservation) => {
                            tokio::spawn(handler.clone().handle(stream, addr, reservation));
                        }
                        Err(e) => {
                            info!(addr = %addr, error = %e, "Rejected connection");
                            drop(stream);
                        }
                    }
                }
            }
        }

        self.registry.close_all().await;
        info!("Relay stopped");
        Ok(())
    }
}
