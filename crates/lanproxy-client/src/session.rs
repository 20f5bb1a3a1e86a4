//! Connection session: one live socket, its read loop and its write path

use crate::handler::SessionHandler;
use crate::transport::BoxedStream;
use bytes::BytesMut;
use lanproxy_proto::{CodecError, Frame, FrameCodec};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Bytes reserved in the receive buffer before every read
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on the graceful socket shutdown during teardown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed by peer")]
    Eof,

    #[error("Session closed")]
    Closed,

    #[error("Session is already listening")]
    AlreadyListening,
}

/// One live socket
///
/// A session is shared as `Arc<Session>`. Handlers only ever borrow it through
/// their callbacks, and a partner link is cleared on both sides the moment
/// either side closes, so no reference cycle outlives the sockets.
pub struct Session {
    id: u64,
    peer: String,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    active: AtomicBool,
    closed: AtomicBool,
    last_read_at: Mutex<Instant>,
    partner: Mutex<Option<Arc<Session>>>,
    handler: Mutex<Option<Arc<dyn SessionHandler>>>,
    shutdown: CancellationToken,
    read_paused: watch::Sender<bool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Wrap a connected stream. `peer` is only used for logging.
    pub fn new(stream: BoxedStream, peer: impl Into<String>) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (read_paused, _) = watch::channel(false);

        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_read_at: Mutex::new(Instant::now()),
            partner: Mutex::new(None),
            handler: Mutex::new(None),
            shutdown: CancellationToken::new(),
            read_paused,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Liveness flag checked by the pool before handing a session out
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_active(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Time of the last successful read
    pub fn last_read_at(&self) -> Instant {
        *self.last_read_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last successful read
    pub fn idle_time(&self) -> Duration {
        self.last_read_at().elapsed()
    }

    fn touch(&self) {
        *self.last_read_at.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Resolves once the session has been closed
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn partner(&self) -> Option<Arc<Session>> {
        self.partner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove this side of the partner link and return the partner
    pub fn take_partner(&self) -> Option<Arc<Session>> {
        self.partner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_partner(&self, partner: Option<Arc<Session>>) {
        *self.partner.lock().unwrap_or_else(PoisonError::into_inner) = partner;
    }

    /// Link two sessions so raw payload can be relayed between them
    pub fn pair(a: &Arc<Session>, b: &Arc<Session>) {
        a.set_partner(Some(b.clone()));
        b.set_partner(Some(a.clone()));
        debug!(session_id = a.id, partner_id = b.id, "Sessions paired");
    }

    /// Sever the partner link on both sides and close the partner
    pub fn unpair(&self) {
        if let Some(partner) = self.take_partner() {
            partner.take_partner();
            debug!(
                session_id = self.id,
                partner_id = partner.id,
                "Closing partner session"
            );
            partner.close();
        }
    }

    /// Stop (or resume) reading from the socket
    pub fn pause_reads(&self, paused: bool) {
        let previous = self.read_paused.send_replace(paused);
        if previous != paused {
            debug!(session_id = self.id, paused = paused, "Read pause changed");
        }
    }

    pub fn is_read_paused(&self) -> bool {
        *self.read_paused.borrow()
    }

    fn handler(&self) -> Option<Arc<dyn SessionHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Encode a frame with the attached handler and write it
    ///
    /// Writes are serialized, so frames from concurrent writers never
    /// interleave on the wire.
    pub async fn write(&self, frame: &Frame) -> Result<(), SessionError> {
        let encoded = match self.handler() {
            Some(handler) => handler.encode(frame)?,
            None => FrameCodec::encode(frame)?,
        };

        trace!(
            session_id = self.id,
            message_type = %frame.message_type,
            uri = %frame.uri,
            len = encoded.len(),
            "Writing frame"
        );

        self.write_raw(&encoded).await
    }

    /// Write bytes verbatim (data plane relay)
    ///
    /// A write stuck on a peer that stopped reading is abandoned with
    /// [`SessionError::Closed`] as soon as the session is closed.
    pub async fn write_raw(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(SessionError::Closed),
            result = async {
                let mut writer = self.writer.lock().await;
                let writer = writer.as_mut().ok_or(SessionError::Closed)?;
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok::<(), SessionError>(())
            } => result,
        }
    }

    /// Close the session
    ///
    /// Idempotent. Stops the read loop and tears down the partner link.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(session_id = self.id, peer = %self.peer, "Closing session");
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.unpair();
    }

    /// Mark the session active and run [`listen`](Self::listen) on a new task
    pub fn spawn(self: &Arc<Self>, handler: Arc<dyn SessionHandler>) -> JoinHandle<()> {
        self.mark_active();
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.listen(handler).await {
                debug!(session_id = session.id, error = %e, "Session ended");
            }
        })
    }

    /// Run the read loop until the socket fails or the session is closed
    ///
    /// Returns `Ok(())` when the session was closed locally and the error
    /// that ended the loop otherwise. Either way the handler's `on_error` has
    /// run once and the socket and partner link are gone when this returns.
    pub async fn listen(self: &Arc<Self>, handler: Arc<dyn SessionHandler>) -> Result<(), SessionError> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut reader) = reader else {
            return Err(SessionError::AlreadyListening);
        };

        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler.clone());
        self.mark_active();
        self.touch();

        debug!(
            session_id = self.id,
            peer = %self.peer,
            role = handler.role(),
            "Session listening"
        );

        let reason = if self.is_closed() {
            SessionError::Closed
        } else {
            handler.on_connected(self).await;
            self.read_loop(&mut reader, handler.as_ref()).await
        };

        match &reason {
            SessionError::Closed => debug!(
                session_id = self.id,
                peer = %self.peer,
                role = handler.role(),
                "Session closed"
            ),
            SessionError::Eof => debug!(
                session_id = self.id,
                peer = %self.peer,
                role = handler.role(),
                "Peer closed connection"
            ),
            error => warn!(
                session_id = self.id,
                peer = %self.peer,
                role = handler.role(),
                error = %error,
                "Session failed"
            ),
        }

        handler.on_error(self, &reason).await;
        self.teardown(reader).await;

        match reason {
            SessionError::Closed => Ok(()),
            error => Err(error),
        }
    }

    async fn read_loop(
        self: &Arc<Self>,
        reader: &mut ReadHalf<BoxedStream>,
        handler: &dyn SessionHandler,
    ) -> SessionError {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut paused = self.read_paused.subscribe();

        loop {
            // Hold off reading while the partner cannot keep up
            loop {
                let is_paused = *paused.borrow_and_update();
                if !is_paused {
                    break;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => return SessionError::Closed,
                    changed = paused.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            buf.reserve(READ_BUFFER_SIZE);
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => return SessionError::Closed,
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => return SessionError::Eof,
                Ok(n) => {
                    trace!(session_id = self.id, bytes = n, "Read from socket");
                    self.touch();
                }
                Err(e) => return SessionError::Io(e),
            }

            loop {
                match handler.decode(&mut buf) {
                    Ok(Some(message)) => handler.on_message(self, message).await,
                    Ok(None) => break,
                    Err(e) => return SessionError::Codec(e),
                }
                if self.is_closed() {
                    return SessionError::Closed;
                }
            }
        }
    }

    async fn teardown(&self, reader: ReadHalf<BoxedStream>) {
        self.close();

        // Pending writes bail out on close, so the lock is released promptly
        let writer = match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                warn!(session_id = self.id, "Timed out waiting for pending write");
                None
            }
        };
        if let Some(mut writer) = writer {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    trace!(session_id = self.id, error = %e, "Socket shutdown failed")
                }
                Err(_) => trace!(session_id = self.id, "Socket shutdown timed out"),
            }
        }
        drop(reader);

        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
