//! lanproxy client CLI
//!
//! Exposes services on a private network through a public lanproxy server.

use anyhow::{Context, Result};
use clap::Parser;
use lanproxy_client::{
    ClientConfig, HeartbeatConfig, LanProxyClient, ReconnectConfig, TlsSettings, DEFAULT_POOL_SIZE,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// lanproxy client - expose intranet services through a lanproxy server
#[derive(Parser, Debug)]
#[command(name = "lanproxy")]
#[command(about = "lanproxy client - expose intranet services through a lanproxy server")]
#[command(version)]
#[command(long_about = r#"
Connects to a lanproxy server, authenticates with the client key and relays
traffic between the server and the backend services it names.

EXAMPLES:
  # Plain TCP
  lanproxy -k 01c1e176d6ee466c8db717a8 -s proxy.example.com -p 4900

  # TLS, trusting a custom CA bundle
  lanproxy -k $KEY -s proxy.example.com -p 4993 --ssl --cer ca.pem

ENVIRONMENT VARIABLES:
  LANPROXY_CLIENT_KEY   Client key
  LANPROXY_SERVER_HOST  Proxy server host
  LANPROXY_SERVER_PORT  Proxy server port
  LANPROXY_SSL          Enable TLS
  LANPROXY_SSL_CERT     CA certificate (PEM) used to verify the server
    "#)]
struct Cli {
    /// Client key
    #[arg(short = 'k', long = "key", env = "LANPROXY_CLIENT_KEY")]
    client_key: Option<String>,

    /// Proxy server host
    #[arg(short = 's', long = "server", env = "LANPROXY_SERVER_HOST")]
    server_host: Option<String>,

    /// Proxy server port
    #[arg(short = 'p', long = "port", env = "LANPROXY_SERVER_PORT", default_value_t = 4900)]
    server_port: u16,

    /// Enable TLS
    #[arg(long, env = "LANPROXY_SSL")]
    ssl: bool,

    /// CA certificate (PEM); without it the server certificate is not verified
    #[arg(long = "cer", env = "LANPROXY_SSL_CERT")]
    ca_cert: Option<PathBuf>,

    /// Number of idle proxy connections kept for reuse
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Heartbeat interval in seconds (a link silent for twice this is dropped)
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,

    /// Delay in seconds before redialing a lost control connection
    #[arg(long, default_value = "3")]
    reconnect_delay: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Client key and server host, both present and non-empty
fn required_args(
    client_key: Option<String>,
    server_host: Option<String>,
) -> Option<(String, String)> {
    let client_key = client_key.filter(|s| !s.is_empty())?;
    let server_host = server_host.filter(|s| !s.is_empty())?;
    Some((client_key, server_host))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let Some((client_key, server_host)) = required_args(cli.client_key, cli.server_host) else {
        warn!("Please set the client key (-k) and the server host (-s)");
        warn!("Example: lanproxy -k <client key> -s <server host> -p 4900");
        return Ok(());
    };

    let mut config = ClientConfig::new(client_key, server_host)
        .with_server_port(cli.server_port)
        .with_pool_size(cli.pool_size)
        .with_heartbeat(HeartbeatConfig::with_interval(Duration::from_secs(
            cli.heartbeat_interval,
        )))
        .with_reconnect(ReconnectConfig::fixed(Duration::from_secs(cli.reconnect_delay)));

    if cli.ssl {
        if cli.ca_cert.is_none() {
            warn!("⚠️  No CA certificate given, server certificate will not be verified");
        }
        config = config.with_tls(TlsSettings {
            ca_cert_path: cli.ca_cert,
        });
    }

    info!("Server: {}", config.server_addr());
    info!("TLS: {}", if cli.ssl { "enabled" } else { "disabled" });

    let client = LanProxyClient::new(config).context("Failed to create lanproxy client")?;

    // Setup Ctrl+C handler
    let shutdown = CancellationToken::new();
    let run = client.run(shutdown.clone());
    tokio::pin!(run);

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = &mut run => false,
    };

    if interrupted {
        info!("Received Ctrl+C, shutting down...");
        shutdown.cancel();
        run.await;
    }

    info!("lanproxy stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_args() {
        assert_eq!(
            required_args(Some("abc".into()), Some("proxy.example.com".into())),
            Some(("abc".to_string(), "proxy.example.com".to_string()))
        );
        assert_eq!(required_args(None, Some("proxy.example.com".into())), None);
        assert_eq!(required_args(Some("abc".into()), None), None);
    }

    #[test]
    fn test_empty_key_or_host_shows_guidance() {
        assert_eq!(required_args(Some(String::new()), Some("proxy.example.com".into())), None);
        assert_eq!(required_args(Some("abc".into()), Some(String::new())), None);

        let cli = Cli::parse_from(["lanproxy", "-k", "", "-s", "proxy.example.com"]);
        assert_eq!(required_args(cli.client_key, cli.server_host), None);
    }
}
