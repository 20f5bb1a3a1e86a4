//! lanproxy client
//!
//! Exposes services on a private network through a public lanproxy server.
//! The client keeps one authenticated control connection to the server. For
//! every CONNECT request it dials the named backend, takes a data link from
//! a pool of anonymous server connections, and relays bytes between the two
//! as TRANSFER frames until either side disconnects.
//!
//! # Example
//!
//! ```no_run
//! use lanproxy_client::{ClientConfig, LanProxyClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("my-client-key", "proxy.example.com");
//! let client = LanProxyClient::new(config)?;
//!
//! let shutdown = CancellationToken::new();
//! client.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod factory;
pub mod handler;
pub mod heartbeat;
pub mod pool;
pub mod reconnect;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientError, LanProxyClient};
pub use config::{ClientConfig, ConfigError, TlsSettings, DEFAULT_POOL_SIZE};
pub use control::ControlHandler;
pub use factory::ProxyLinkFactory;
pub use handler::{Message, SessionHandler};
pub use heartbeat::HeartbeatConfig;
pub use pool::{ConnectionPool, PoolError, Pooler};
pub use reconnect::{ReconnectConfig, ReconnectManager};
pub use registry::{TunnelInfo, TunnelRegistry};
pub use relay::RelayHandler;
pub use session::{Session, SessionError};
pub use transport::{Dialer, TransportError};
