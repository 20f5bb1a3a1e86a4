use crate::control::ControlHandler;
use crate::heartbeat::HeartbeatConfig;
use crate::pool::{ConnectionPool, PoolError, Pooler};
use crate::session::Session;
use crate::transport::Dialer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Opens anonymous data links to the proxy server for the pool
pub struct ProxyLinkFactory {
    server_addr: String,
    dialer: Dialer,
    heartbeat: HeartbeatConfig,
}

impl ProxyLinkFactory {
    pub fn new(server_addr: impl Into<String>, dialer: Dialer, heartbeat: HeartbeatConfig) -> Self {
        Self {
            server_addr: server_addr.into(),
            dialer,
            heartbeat,
        }
    }
}

#[async_trait]
impl Pooler for ProxyLinkFactory {
    async fn create(&self, pool: &Arc<ConnectionPool>) -> Result<Arc<Session>, PoolError> {
        let stream = self.dialer.dial(&self.server_addr).await?;
        let session = Session::new(stream, self.server_addr.as_str());

        debug!(
            session_id = session.id(),
            server = %self.server_addr,
            tls = self.dialer.is_tls(),
            "Opened proxy data link"
        );

        let handler = ControlHandler::anonymous(pool, self.heartbeat.clone());
        session.spawn(Arc::new(handler));
        Ok(session)
    }

    fn is_active(&self, session: &Session) -> bool {
        session.is_active()
    }

    fn dispose(&self, session: &Session) {
        session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use lanproxy_proto::FrameCodec;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_create_dials_server_and_sends_no_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let factory = Arc::new(ProxyLinkFactory::new(
            addr,
            Dialer::plain(),
            HeartbeatConfig::default(),
        ));
        let pool = ConnectionPool::new(2, factory.clone());

        let link = pool.acquire().await.unwrap();
        assert!(factory.is_active(&link));

        let (mut server, _) = listener.accept().await.unwrap();
        factory.dispose(&link);
        assert!(!factory.is_active(&link));

        // Nothing was written before the link closed
        let mut buf = BytesMut::new();
        assert_eq!(server.read_buf(&mut buf).await.unwrap(), 0);
        assert!(FrameCodec::decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let factory = Arc::new(ProxyLinkFactory::new(
            addr,
            Dialer::plain(),
            HeartbeatConfig::default(),
        ));
        let pool = ConnectionPool::new(2, factory);

        assert!(matches!(pool.acquire().await, Err(PoolError::Create(_))));
    }
}
