//! Pool of idle proxy connections
//!
//! Every tunnel circuit needs its own connection to the proxy server. Those
//! links are dialed lazily, handed out by [`ConnectionPool::acquire`] and
//! returned with [`ConnectionPool::release`] once the server tears the
//! circuit down. The idle set is a LIFO stack, so the most recently used
//! link is reused first.

use crate::session::Session;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

/// Pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to create proxy connection: {0}")]
    Create(#[from] TransportError),
}

/// Creates, checks and destroys pooled sessions
#[async_trait]
pub trait Pooler: Send + Sync {
    /// Open a new session. The pool is passed so the session's handler can
    /// find its way back on release.
    async fn create(&self, pool: &Arc<ConnectionPool>) -> Result<Arc<Session>, PoolError>;

    /// Whether an idle session can still be handed out
    fn is_active(&self, session: &Session) -> bool;

    /// Destroy a session the pool no longer keeps
    fn dispose(&self, session: &Session);
}

pub struct ConnectionPool {
    capacity: usize,
    idle: Mutex<Vec<Arc<Session>>>,
    pooler: Arc<dyn Pooler>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.capacity)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(capacity: usize, pooler: Arc<dyn Pooler>) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            idle: Mutex::new(Vec::with_capacity(capacity.min(16))),
            pooler,
        })
    }

    /// Hand out an idle session, or create one when none is left
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<Session>, PoolError> {
        loop {
            let candidate = self.idle().pop();
            let Some(session) = candidate else {
                break;
            };

            if self.pooler.is_active(&session) {
                trace!(session_id = session.id(), "Reusing pooled connection");
                return Ok(session);
            }

            debug!(session_id = session.id(), "Discarding stale pooled connection");
            self.pooler.dispose(&session);
        }

        let session = self.pooler.create(self).await?;
        debug!(session_id = session.id(), "Created pooled connection");
        Ok(session)
    }

    /// Return a session for reuse
    ///
    /// The partner link is cleared first. A session already held by the pool
    /// is left alone; past capacity the session is disposed instead.
    pub fn release(&self, session: Arc<Session>) {
        if let Some(partner) = session.take_partner() {
            partner.take_partner();
        }
        session.pause_reads(false);

        {
            let mut idle = self.idle();
            if idle.iter().any(|s| Arc::ptr_eq(s, &session)) {
                return;
            }
            if idle.len() < self.capacity {
                trace!(
                    session_id = session.id(),
                    idle = idle.len() + 1,
                    "Returned connection to pool"
                );
                idle.push(session);
                return;
            }
        }

        debug!(session_id = session.id(), "Pool full, disposing connection");
        self.pooler.dispose(&session);
    }

    /// Forget an idle session that died
    pub fn remove(&self, session: &Session) {
        let mut idle = self.idle();
        let before = idle.len();
        idle.retain(|s| !std::ptr::eq(s.as_ref(), session));
        if idle.len() != before {
            trace!(session_id = session.id(), "Removed dead connection from pool");
        }
    }

    /// Close every idle session
    pub fn close_idle(&self) {
        let drained: Vec<_> = self.idle().drain(..).collect();
        for session in drained {
            self.pooler.dispose(&session);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Session>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
