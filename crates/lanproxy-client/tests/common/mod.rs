//! Mock lanproxy server helpers for integration tests

#![allow(dead_code)]

use bytes::BytesMut;
use lanproxy_client::{ClientConfig, LanProxyClient, ReconnectConfig};
use lanproxy_proto::{Frame, FrameCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lanproxy_client=debug")
        .with_test_writer()
        .try_init();
}

/// A framed connection as seen from the proxy server
pub struct ServerConn<S> {
    stream: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Next frame, or `None` once the client closed the connection
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                if let Some(frame) = FrameCodec::decode(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                if self.stream.read_buf(&mut self.buf).await.unwrap_or(0) == 0 {
                    return None;
                }
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    pub async fn send(&mut self, frame: Frame) {
        let encoded = FrameCodec::encode(&frame).unwrap();
        self.stream.write_all(&encoded).await.unwrap();
        self.stream.flush().await.unwrap();
    }
}

pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .unwrap();
    stream
}

/// Address of a port nothing listens on
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub fn test_config(client_key: &str, server: &TcpListener) -> ClientConfig {
    let port = server.local_addr().unwrap().port();
    ClientConfig::new(client_key, "127.0.0.1")
        .with_server_port(port)
        .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(100)))
}

pub struct RunningClient {
    pub client: Arc<LanProxyClient>,
    pub shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningClient {
    pub fn start(config: ClientConfig) -> Self {
        let client = Arc::new(LanProxyClient::new(config).unwrap());
        let shutdown = CancellationToken::new();

        let task = {
            let client = client.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { client.run(shutdown).await })
        };

        Self {
            client,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(TIMEOUT, self.task)
            .await
            .expect("client did not stop")
            .unwrap();
    }
}

/// Poll `check` until it holds
pub async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
