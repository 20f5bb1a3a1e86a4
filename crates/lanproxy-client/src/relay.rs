//! Handler for sockets to the real backend service

use crate::handler::{Message, SessionHandler};
use crate::registry::TunnelRegistry;
use crate::session::{Session, SessionError};
use async_trait::async_trait;
use bytes::BytesMut;
use lanproxy_proto::{CodecError, Frame};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Relays backend bytes to the paired proxy link as TRANSFER frames
pub struct RelayHandler {
    user_id: String,
    serial_number: u64,
    registry: TunnelRegistry,
}

impl RelayHandler {
    pub fn new(user_id: impl Into<String>, serial_number: u64, registry: TunnelRegistry) -> Self {
        Self {
            user_id: user_id.into(),
            serial_number,
            registry,
        }
    }
}

#[async_trait]
impl SessionHandler for RelayHandler {
    fn role(&self) -> &'static str {
        "relay"
    }

    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::Raw(buf.split().freeze())))
    }

    async fn on_connected(&self, session: &Arc<Session>) {
        debug!(
            session_id = session.id(),
            user_id = %self.user_id,
            backend = %session.peer(),
            "Backend connected"
        );
    }

    async fn on_message(&self, session: &Arc<Session>, message: Message) {
        let Message::Raw(data) = message else {
            return;
        };

        let Some(partner) = session.partner() else {
            debug!(
                session_id = session.id(),
                user_id = %self.user_id,
                "No proxy link for backend data, closing"
            );
            session.close();
            return;
        };

        trace!(
            session_id = session.id(),
            user_id = %self.user_id,
            bytes = data.len(),
            "Relaying backend data"
        );

        let frame = Frame::transfer(self.user_id.as_str(), self.serial_number, data);
        if let Err(e) = partner.write(&frame).await {
            warn!(
                session_id = session.id(),
                user_id = %self.user_id,
                error = %e,
                "Failed to relay backend data"
            );
            session.close();
        }
    }

    async fn on_error(&self, session: &Arc<Session>, _error: &SessionError) {
        self.registry.unregister(&self.user_id, session.id()).await;

        // Tell the server while the pair still exists
        if let Some(partner) = session.partner() {
            if let Err(e) = partner.write(&Frame::disconnect(self.user_id.as_str())).await {
                debug!(
                    user_id = %self.user_id,
                    error = %e,
                    "Failed to send DISCONNECT for closed backend"
                );
            }
        }
    }
}
