//! Dialing the proxy server over plain TCP or TLS

use crate::config::TlsSettings;
use rustls::pki_types::{CertificateDer, ServerName};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Any bidirectional byte stream a session can run on
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens byte streams to the proxy server, optionally wrapped in TLS
#[derive(Clone)]
pub struct Dialer {
    tls: Option<TlsConnector>,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Dialer {
    /// Plain TCP dialer
    pub fn plain() -> Self {
        Self { tls: None }
    }

    /// TLS dialer
    ///
    /// Without a CA certificate path server verification is skipped. With one,
    /// the PEM bundle is the only trust anchor.
    pub fn tls(settings: &TlsSettings) -> TransportResult<Self> {
        let connector = build_tls_connector(settings)?;
        Ok(Self {
            tls: Some(connector),
        })
    }

    /// Build a dialer from optional TLS settings
    pub fn from_settings(settings: Option<&TlsSettings>) -> TransportResult<Self> {
        match settings {
            Some(settings) => Self::tls(settings),
            None => Ok(Self::plain()),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Dial `host:port`
    pub async fn dial(&self, address: &str) -> TransportResult<BoxedStream> {
        let stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    address: address.to_string(),
                    source: e,
                })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %address, error = %e, "Failed to set TCP_NODELAY");
        }

        let Some(connector) = &self.tls else {
            debug!(address = %address, "TCP connection established");
            return Ok(Box::new(stream));
        };

        let server_name = server_name(address)?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| {
                warn!(address = %address, error = %e, "TLS handshake failed");
                TransportError::TlsError(format!("Handshake with {} failed: {}", address, e))
            })?;

        debug!(address = %address, "TLS connection established");
        Ok(Box::new(tls_stream))
    }
}

/// Server name used for SNI and verification: the host part of `host:port`
fn server_name(address: &str) -> TransportResult<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string()).map_err(|e| {
        TransportError::ConfigurationError(format!("Invalid server name '{}': {}", host, e))
    })
}

/// Build rustls TlsConnector for the proxy link
fn build_tls_connector(settings: &TlsSettings) -> TransportResult<TlsConnector> {
    ensure_crypto_provider();

    let client_crypto = match &settings.ca_cert_path {
        Some(path) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| {
                    TransportError::ConfigurationError(format!("Invalid CA cert: {}", e))
                })?;
            }

            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        None => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(SkipVerification::new())
            .with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(client_crypto)))
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

fn load_certs(path: &Path) -> TransportResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        TransportError::TlsError(format!(
            "Failed to open cert file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::TlsError(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(TransportError::TlsError(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
