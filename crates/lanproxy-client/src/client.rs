use crate::config::{ClientConfig, ConfigError};
use crate::control::ControlHandler;
use crate::factory::ProxyLinkFactory;
use crate::pool::ConnectionPool;
use crate::reconnect::ReconnectManager;
use crate::registry::TunnelRegistry;
use crate::session::{Session, SessionError};
use crate::transport::{BoxedStream, Dialer, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Keeps the control connection to the proxy server alive and serves tunnel
/// circuits through pooled data links
pub struct LanProxyClient {
    config: ClientConfig,
    dialer: Dialer,
    pool: Arc<ConnectionPool>,
    registry: TunnelRegistry,
}

impl LanProxyClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let dialer = Dialer::from_settings(config.tls.as_ref())?;
        let factory = ProxyLinkFactory::new(
            config.server_addr(),
            dialer.clone(),
            config.heartbeat.clone(),
        );
        let pool = ConnectionPool::new(config.pool_size, Arc::new(factory));

        Ok(Self {
            config,
            dialer,
            pool,
            registry: TunnelRegistry::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Run until `shutdown` is cancelled
    ///
    /// The control connection is redialed after every failure, waiting the
    /// configured reconnect delay in between.
    pub async fn run(&self, shutdown: CancellationToken) {
        let server_addr = self.config.server_addr();
        let mut reconnect = ReconnectManager::new(self.config.reconnect.clone());

        info!(
            server = %server_addr,
            tls = self.dialer.is_tls(),
            pool_size = self.pool.capacity(),
            "Starting lanproxy client"
        );

        loop {
            let dialed = tokio::select! {
                _ = shutdown.cancelled() => break,
                dialed = self.dialer.dial(&server_addr) => dialed,
            };

            match dialed {
                Ok(stream) => {
                    reconnect.reset();
                    if self.serve(stream, &server_addr, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(server = %server_addr, error = %e, "Failed to connect to proxy server");
                }
            }

            warn!(
                "Reconnecting in {}s (attempt {})",
                reconnect.current_backoff().as_secs_f64(),
                reconnect.attempt() + 1
            );
            if !reconnect.wait(&shutdown).await {
                break;
            }
        }

        self.pool.close_idle();
        self.registry.clear().await;
        info!("lanproxy client stopped");
    }

    /// Serve one control connection; returns true when shutdown was requested
    async fn serve(
        &self,
        stream: BoxedStream,
        server_addr: &str,
        shutdown: &CancellationToken,
    ) -> bool {
        let session = Session::new(stream, server_addr);
        let handler = ControlHandler::control(
            self.config.client_key.as_str(),
            &self.pool,
            self.registry.clone(),
            self.config.heartbeat.clone(),
        );

        let listen = session.listen(Arc::new(handler));
        tokio::pin!(listen);

        let shutdown_requested = tokio::select! {
            result = &mut listen => {
                match result {
                    Ok(()) | Err(SessionError::Eof) => {
                        warn!(server = %server_addr, "Control connection closed")
                    }
                    Err(e) => {
                        warn!(server = %server_addr, error = %e, "Control connection lost")
                    }
                }
                false
            }
            _ = shutdown.cancelled() => true,
        };

        if shutdown_requested {
            debug!("Closing control connection");
            session.close();
            if let Err(e) = listen.await {
                debug!(server = %server_addr, error = %e, "Control connection ended");
            }
        }
        shutdown_requested
    }
}
