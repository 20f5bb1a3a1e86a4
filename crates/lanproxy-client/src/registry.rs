use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// An open tunnel circuit: one server-side user connection relayed to a
/// local backend
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    /// User id assigned by the proxy server
    pub user_id: String,
    /// Backend address from the CONNECT request
    pub backend_address: String,
    /// Backend socket session
    pub session: Arc<Session>,
    /// Timestamp when the circuit was established
    pub established_at: Instant,
}

/// Tracks open circuits so they can be torn down with the control link
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    /// Map of user_id -> TunnelInfo
    tunnels: Arc<RwLock<HashMap<String, TunnelInfo>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new circuit, replacing any previous one for the same user
    pub async fn register(&self, info: TunnelInfo) {
        tracing::debug!(
            user_id = %info.user_id,
            backend_address = %info.backend_address,
            session_id = info.session.id(),
            "Registering tunnel"
        );

        let mut tunnels = self.tunnels.write().await;
        if let Some(previous) = tunnels.insert(info.user_id.clone(), info) {
            previous.session.close();
        }

        tracing::info!(active_tunnels = tunnels.len(), "Tunnel registered");
    }

    /// Unregister a circuit when its backend session ends
    ///
    /// Only removes the entry if it still belongs to `session_id`, so a late
    /// teardown cannot drop a newer circuit for the same user.
    pub async fn unregister(&self, user_id: &str, session_id: u64) {
        let mut tunnels = self.tunnels.write().await;

        match tunnels.get(user_id) {
            Some(info) if info.session.id() == session_id => {
                let duration = info.established_at.elapsed();
                tracing::info!(
                    user_id = %user_id,
                    backend_address = %info.backend_address,
                    duration_secs = duration.as_secs(),
                    active_tunnels = tunnels.len() - 1,
                    "Tunnel unregistered"
                );
                tunnels.remove(user_id);
            }
            _ => {
                tracing::debug!(user_id = %user_id, session_id, "Tunnel already gone");
            }
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<TunnelInfo> {
        let tunnels = self.tunnels.read().await;
        tunnels.get(user_id).cloned()
    }

    /// Get the number of open circuits
    pub async fn count(&self) -> usize {
        self.tunnels.read().await.len()
    }

    /// Close every backend session (control link lost or shutdown)
    pub async fn clear(&self) {
        let drained: Vec<TunnelInfo> = {
            let mut tunnels = self.tunnels.write().await;
            tunnels.drain().map(|(_, info)| info).collect()
        };

        for info in &drained {
            info.session.close();
        }

        if !drained.is_empty() {
            tracing::info!(cleared_tunnels = drained.len(), "All tunnels cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::duplex_session;

    fn tunnel(user_id: &str) -> (TunnelInfo, tokio::io::DuplexStream) {
        let (session, peer) = duplex_session();
        let info = TunnelInfo {
            user_id: user_id.to_string(),
            backend_address: "127.0.0.1:8080".to_string(),
            session,
            established_at: Instant::now(),
        };
        (info, peer)
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = TunnelRegistry::new();
        let (info, _peer) = tunnel("user42");
        let session_id = info.session.id();

        registry.register(info).await;
        assert_eq!(registry.count().await, 1);

        let retrieved = registry.get("user42").await.unwrap();
        assert_eq!(retrieved.backend_address, "127.0.0.1:8080");

        registry.unregister("user42", session_id).await;
        assert_eq!(registry.count().await, 0);
        assert!(registry.get("user42").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_tunnel() {
        let registry = TunnelRegistry::new();
        let (old, _old_peer) = tunnel("user42");
        let old_session = old.session.clone();
        let (new, _new_peer) = tunnel("user42");
        let new_id = new.session.id();

        registry.register(old).await;
        registry.register(new).await;
        assert!(old_session.is_closed());

        registry.unregister("user42", old_session.id()).await;
        assert_eq!(registry.get("user42").await.unwrap().session.id(), new_id);
    }

    #[tokio::test]
    async fn test_clear_closes_sessions() {
        let registry = TunnelRegistry::new();
        let (a, _peer_a) = tunnel("user1");
        let (b, _peer_b) = tunnel("user2");
        let sessions = vec![a.session.clone(), b.session.clone()];

        registry.register(a).await;
        registry.register(b).await;
        assert_eq!(registry.count().await, 2);

        registry.clear().await;
        assert_eq!(registry.count().await, 0);
        assert!(sessions.iter().all(|s| s.is_closed()));
    }
}
