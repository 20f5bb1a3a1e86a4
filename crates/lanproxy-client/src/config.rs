//! Client configuration

use crate::heartbeat::HeartbeatConfig;
use crate::reconnect::ReconnectConfig;
use lanproxy_proto::{DEFAULT_SERVER_PORT, MAX_URI_LENGTH};
use std::path::PathBuf;
use thiserror::Error;

/// Default number of idle proxy connections kept for reuse
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Client key too long: {0} bytes (max 255)")]
    ClientKeyTooLong(usize),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS settings for the proxy link
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM bundle trusted for server verification; `None` skips verification
    pub ca_cert_path: Option<PathBuf>,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Key presented in the AUTH handshake of the control connection
    pub client_key: String,
    pub server_host: String,
    pub server_port: u16,
    /// `Some` enables TLS on every connection to the proxy server
    pub tls: Option<TlsSettings>,
    /// Capacity of the idle proxy connection pool
    pub pool_size: usize,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_key: String::new(),
            server_host: String::new(),
            server_port: DEFAULT_SERVER_PORT,
            tls: None,
            pool_size: DEFAULT_POOL_SIZE,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(client_key: impl Into<String>, server_host: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            server_host: server_host.into(),
            ..Default::default()
        }
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Proxy server address as `host:port`
    pub fn server_addr(&self) -> String {
        if self.server_host.contains(':') && !self.server_host.starts_with('[') {
            format!("[{}]:{}", self.server_host, self.server_port)
        } else {
            format!("{}:{}", self.server_host, self.server_port)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_key.is_empty() {
            return Err(ConfigError::Missing("client key"));
        }
        if self.client_key.len() > MAX_URI_LENGTH {
            return Err(ConfigError::ClientKeyTooLong(self.client_key.len()));
        }
        if self.server_host.is_empty() {
            return Err(ConfigError::Missing("server host"));
        }
        if self.server_port == 0 {
            return Err(ConfigError::Invalid("server port must be > 0".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool size must be > 0".to_string()));
        }
        self.heartbeat.validate()?;
        Ok(())
    }
}
