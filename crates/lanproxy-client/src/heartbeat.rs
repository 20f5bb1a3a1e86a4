//! Heartbeat and liveness detection for proxy links
//!
//! The server never pings. Every `interval` the client checks how long the
//! link has been silent: at `timeout` or more the session is closed,
//! otherwise a HEARTBEAT frame goes out.

use crate::config::ConfigError;
use crate::session::Session;
use lanproxy_proto::Frame;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Heartbeat timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between heartbeat ticks
    pub interval: Duration,
    /// Silence after which the link is declared dead
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::with_interval(Duration::from_secs(30))
    }
}

impl HeartbeatConfig {
    /// Timeout of twice the interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * 2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be > 0".to_string(),
            ));
        }
        if self.timeout < self.interval {
            return Err(ConfigError::Invalid(
                "heartbeat timeout must be at least one interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// Start the heartbeat for a session
///
/// The task ends when `stop` is cancelled, when the session is gone or
/// closed, or after it closes a dead session itself.
pub fn spawn(
    session: Weak<Session>,
    config: HeartbeatConfig,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    trace!("Heartbeat stopped");
                    return;
                }
                _ = tokio::time::sleep(config.interval) => {}
            }

            let Some(session) = session.upgrade() else {
                return;
            };
            if session.is_closed() {
                return;
            }

            let idle = session.idle_time();
            if idle >= config.timeout {
                warn!(
                    session_id = session.id(),
                    peer = %session.peer(),
                    idle_secs = idle.as_secs(),
                    "Connection timed out, closing"
                );
                session.close();
                return;
            }

            if let Err(e) = session.write(&Frame::heartbeat()).await {
                debug!(
                    session_id = session.id(),
                    error = %e,
                    "Failed to send heartbeat, closing"
                );
                session.close();
                return;
            }
            trace!(session_id = session.id(), "Heartbeat sent");
        }
    })
}
