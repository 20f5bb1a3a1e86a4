//! Handler for connections to the proxy server
//!
//! The same handler serves two roles. The control connection carries the
//! client key: it authenticates on connect and receives CONNECT requests for
//! new circuits. Anonymous connections are the pooled data links; each one
//! carries a single circuit at a time and goes back to the pool when the
//! server sends DISCONNECT.

use crate::handler::{Message, SessionHandler};
use crate::heartbeat::{self, HeartbeatConfig};
use crate::pool::ConnectionPool;
use crate::registry::{TunnelInfo, TunnelRegistry};
use crate::relay::RelayHandler;
use crate::session::{Session, SessionError};
use crate::transport::Dialer;
use async_trait::async_trait;
use lanproxy_proto::{Frame, MessageType};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

enum Role {
    Control {
        client_key: String,
        registry: TunnelRegistry,
    },
    Anonymous,
}

pub struct ControlHandler {
    role: Role,
    pool: Weak<ConnectionPool>,
    heartbeat: HeartbeatConfig,
    heartbeat_stop: CancellationToken,
}

impl ControlHandler {
    /// Handler for the authenticated control connection
    pub fn control(
        client_key: impl Into<String>,
        pool: &Arc<ConnectionPool>,
        registry: TunnelRegistry,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            role: Role::Control {
                client_key: client_key.into(),
                registry,
            },
            pool: Arc::downgrade(pool),
            heartbeat,
            heartbeat_stop: CancellationToken::new(),
        }
    }

    /// Handler for a pooled data link
    pub fn anonymous(pool: &Arc<ConnectionPool>, heartbeat: HeartbeatConfig) -> Self {
        Self {
            role: Role::Anonymous,
            pool: Arc::downgrade(pool),
            heartbeat,
            heartbeat_stop: CancellationToken::new(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self.role, Role::Control { .. })
    }

    fn handle_connect(&self, session: &Arc<Session>, frame: Frame) {
        let Role::Control {
            client_key,
            registry,
        } = &self.role
        else {
            debug!(
                session_id = session.id(),
                user_id = %frame.uri,
                "Ignoring CONNECT on a data link"
            );
            return;
        };

        let circuit = Circuit {
            control: session.clone(),
            pool: self.pool.clone(),
            registry: registry.clone(),
            client_key: client_key.clone(),
            user_id: frame.uri.clone(),
            serial_number: frame.serial_number,
            backend_address: String::from_utf8_lossy(&frame.data).into_owned(),
        };
        tokio::spawn(circuit.open());
    }

    fn handle_disconnect(&self, session: &Arc<Session>) {
        session.unpair();

        if let Role::Anonymous = self.role {
            if let Some(pool) = self.pool.upgrade() {
                pool.release(session.clone());
            }
        }
    }

    fn handle_write_control(&self, session: &Arc<Session>, frame: &Frame) {
        let Some(partner) = session.partner() else {
            return;
        };
        let writable = frame.data.first().map_or(true, |b| *b != 0);
        partner.pause_reads(!writable);
    }
}

#[async_trait]
impl SessionHandler for ControlHandler {
    fn role(&self) -> &'static str {
        match self.role {
            Role::Control { .. } => "control",
            Role::Anonymous => "anonymous",
        }
    }

    async fn on_connected(&self, session: &Arc<Session>) {
        if let Role::Control { client_key, .. } = &self.role {
            if let Err(e) = session.write(&Frame::auth(client_key)).await {
                warn!(
                    session_id = session.id(),
                    peer = %session.peer(),
                    error = %e,
                    "Failed to send AUTH"
                );
                session.close();
                return;
            }
            info!(peer = %session.peer(), "Connected to proxy server, AUTH sent");
        }

        heartbeat::spawn(
            Arc::downgrade(session),
            self.heartbeat.clone(),
            self.heartbeat_stop.clone(),
        );
    }

    async fn on_message(&self, session: &Arc<Session>, message: Message) {
        let Message::Frame(frame) = message else {
            return;
        };

        trace!(
            session_id = session.id(),
            role = self.role(),
            message_type = %frame.message_type,
            uri = %frame.uri,
            "Received frame"
        );

        match frame.message_type {
            MessageType::Connect => self.handle_connect(session, frame),
            MessageType::Transfer => match session.partner() {
                Some(partner) => {
                    if let Err(e) = partner.write_raw(&frame.data).await {
                        debug!(
                            session_id = session.id(),
                            partner_id = partner.id(),
                            error = %e,
                            "Failed to write to backend"
                        );
                    }
                }
                None => trace!(
                    session_id = session.id(),
                    bytes = frame.data.len(),
                    "Dropping TRANSFER without a backend"
                ),
            },
            MessageType::Disconnect => self.handle_disconnect(session),
            MessageType::WriteControl => self.handle_write_control(session, &frame),
            MessageType::Heartbeat | MessageType::Auth => {}
            MessageType::Unknown(code) => {
                debug!(session_id = session.id(), code, "Ignoring unknown message type")
            }
        }
    }

    async fn on_error(&self, session: &Arc<Session>, _error: &SessionError) {
        self.heartbeat_stop.cancel();

        match &self.role {
            Role::Control { registry, .. } => registry.clear().await,
            Role::Anonymous => {
                if let Some(pool) = self.pool.upgrade() {
                    pool.remove(session);
                }
            }
        }
    }
}

/// A CONNECT request being turned into a relayed circuit
struct Circuit {
    control: Arc<Session>,
    pool: Weak<ConnectionPool>,
    registry: TunnelRegistry,
    client_key: String,
    user_id: String,
    serial_number: u64,
    backend_address: String,
}

impl Circuit {
    async fn open(self) {
        let backend = match Dialer::plain().dial(&self.backend_address).await {
            Ok(stream) => Session::new(stream, self.backend_address.as_str()),
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    backend = %self.backend_address,
                    error = %e,
                    "Failed to connect to backend"
                );
                self.reject().await;
                return;
            }
        };

        let link = match self.pool.upgrade() {
            Some(pool) => pool.acquire().await,
            None => {
                backend.close();
                return;
            }
        };
        let link = match link {
            Ok(link) => link,
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    error = %e,
                    "Failed to get a proxy connection"
                );
                backend.close();
                self.reject().await;
                return;
            }
        };

        Session::pair(&link, &backend);

        let uri = format!("{}@{}", self.user_id, self.client_key);
        if let Err(e) = link.write(&Frame::connect(uri, self.serial_number)).await {
            warn!(
                user_id = %self.user_id,
                session_id = link.id(),
                error = %e,
                "Failed to announce circuit"
            );
            backend.close();
            self.reject().await;
            return;
        }

        self.registry
            .register(TunnelInfo {
                user_id: self.user_id.clone(),
                backend_address: self.backend_address.clone(),
                session: backend.clone(),
                established_at: Instant::now(),
            })
            .await;

        info!(
            user_id = %self.user_id,
            backend = %self.backend_address,
            link_id = link.id(),
            "Tunnel established"
        );

        let handler = RelayHandler::new(self.user_id, self.serial_number, self.registry);
        backend.spawn(Arc::new(handler));
    }

    async fn reject(&self) {
        if let Err(e) = self.control.write(&Frame::disconnect(self.user_id.as_str())).await {
            debug!(
                user_id = %self.user_id,
                error = %e,
                "Failed to send DISCONNECT"
            );
        }
    }
}
