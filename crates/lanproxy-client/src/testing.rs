//! Shared helpers for unit tests

use crate::handler::{Message, SessionHandler};
use crate::pool::{ConnectionPool, PoolError, Pooler};
use crate::session::{Session, SessionError};
use crate::transport::TransportError;
use async_trait::async_trait;
use bytes::BytesMut;
use lanproxy_proto::{Frame, FrameCodec};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

/// A session over an in-memory pipe, plus the far end of the pipe
pub fn duplex_session() -> (Arc<Session>, DuplexStream) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    (Session::new(Box::new(local), "duplex"), remote)
}

/// Read the next frame from the far end of a pipe
pub async fn read_frame(stream: &mut DuplexStream, buf: &mut BytesMut) -> Frame {
    loop {
        if let Some(frame) = FrameCodec::decode(buf).unwrap() {
            return frame;
        }
        let n = stream.read_buf(buf).await.unwrap();
        assert!(n > 0, "pipe closed before a full frame arrived");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    Frame(Frame),
    Raw(Vec<u8>),
    Error(String),
}

/// Handler that reports every callback on a channel
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

#[async_trait]
impl SessionHandler for RecordingHandler {
    fn role(&self) -> &'static str {
        "recording"
    }

    async fn on_connected(&self, _session: &Arc<Session>) {
        let _ = self.events.send(Event::Connected);
    }

    async fn on_message(&self, _session: &Arc<Session>, message: Message) {
        let event = match message {
            Message::Frame(frame) => Event::Frame(frame),
            Message::Raw(data) => Event::Raw(data.to_vec()),
        };
        let _ = self.events.send(event);
    }

    async fn on_error(&self, _session: &Arc<Session>, error: &SessionError) {
        let kind = match error {
            SessionError::Io(_) => "io",
            SessionError::Codec(_) => "codec",
            SessionError::Eof => "eof",
            SessionError::Closed => "closed",
            SessionError::AlreadyListening => "already_listening",
        };
        let _ = self.events.send(Event::Error(kind.to_string()));
    }
}

/// Pooler creating sessions over in-memory pipes
#[derive(Default)]
pub struct MockPooler {
    pub created: AtomicUsize,
    pub disposed: AtomicUsize,
    pub fail: AtomicBool,
    remotes: Mutex<Vec<DuplexStream>>,
}

impl MockPooler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Server ends of every session created so far
    pub fn take_remotes(&self) -> Vec<DuplexStream> {
        std::mem::take(&mut *self.remotes.lock().unwrap())
    }
}

#[async_trait]
impl Pooler for MockPooler {
    async fn create(&self, _pool: &Arc<ConnectionPool>) -> Result<Arc<Session>, PoolError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PoolError::Create(TransportError::ConnectFailed {
                address: "mock".to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }));
        }

        let (session, remote) = duplex_session();
        session.mark_active();
        self.remotes.lock().unwrap().push(remote);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    fn is_active(&self, session: &Session) -> bool {
        session.is_active()
    }

    fn dispose(&self, session: &Session) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        session.close();
    }
}
