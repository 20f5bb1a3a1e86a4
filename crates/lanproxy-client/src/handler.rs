//! Session handler contract
//!
//! A [`Session`] owns the socket and the read loop; everything role specific
//! (framing, what to do with a message, cleanup on failure) lives behind this
//! trait. Two roles implement it:
//!
//! - [`ControlHandler`](crate::control::ControlHandler): links to the proxy
//!   server, both the authenticated control link and anonymous pooled links
//! - [`RelayHandler`](crate::relay::RelayHandler): sockets to the real backend

use crate::session::{Session, SessionError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lanproxy_proto::{CodecError, Frame, FrameCodec};
use std::sync::Arc;

/// A unit of inbound data produced by [`SessionHandler::decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A protocol frame from the proxy server
    Frame(Frame),
    /// Unframed bytes from a backend socket
    Raw(Bytes),
}

#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Short role name used in logs
    fn role(&self) -> &'static str;

    /// Take the next complete message off the front of the receive buffer.
    ///
    /// `Ok(None)` means more bytes are needed. Nothing may be consumed in
    /// that case.
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        Ok(FrameCodec::decode(buf)?.map(Message::Frame))
    }

    /// Serialize a frame written through [`Session::write`]
    fn encode(&self, frame: &Frame) -> Result<Bytes, CodecError> {
        FrameCodec::encode(frame)
    }

    /// Called once the read loop starts, before any message is dispatched
    async fn on_connected(&self, session: &Arc<Session>);

    /// Called for every decoded message, in receive order
    async fn on_message(&self, session: &Arc<Session>, message: Message);

    /// Called exactly once when the read loop ends, before the socket and the
    /// partner link are torn down
    async fn on_error(&self, session: &Arc<Session>, error: &SessionError);
}
