//! Reconnection backoff for the control connection

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reconnection configuration
///
/// The default is a fixed 3 second delay. Attempts are never capped: the
/// control connection is redialed for as long as the client runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

impl ReconnectConfig {
    /// Same delay before every attempt
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
        }
    }
}

/// Tracks the delay before the next redial of the control connection
pub struct ReconnectManager {
    config: ReconnectConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    /// Sleep for the current backoff, then grow it
    ///
    /// Returns `false` without growing the backoff if `shutdown` fires first.
    pub async fn wait(&mut self, shutdown: &CancellationToken) -> bool {
        self.attempt += 1;

        debug!(
            delay_ms = self.current_backoff.as_millis() as u64,
            attempt = self.attempt,
            "Waiting before reconnecting"
        );

        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = sleep(self.current_backoff) => {}
        }

        let grown = self.current_backoff.mul_f64(self.config.multiplier);
        self.current_backoff = grown.min(self.config.max_backoff);
        true
    }

    /// Back to the initial delay after a successful connection
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!(attempts = self.attempt, "Connected, resetting reconnect backoff");
        }
        self.current_backoff = self.config.initial_backoff;
        self.attempt = 0;
    }

    /// Failed attempts since the last successful connection
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff() {
        let shutdown = CancellationToken::new();
        let mut manager = ReconnectManager::new(ReconnectConfig::default());

        for attempt in 1..=5 {
            let start = tokio::time::Instant::now();
            assert!(manager.wait(&shutdown).await);
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(3), "waited {:?}", elapsed);
            assert!(elapsed < Duration::from_millis(3100), "waited {:?}", elapsed);
            assert_eq!(manager.attempt(), attempt);
            assert_eq!(manager.current_backoff(), Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = ReconnectConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        };

        let shutdown = CancellationToken::new();
        let mut manager = ReconnectManager::new(config);

        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.current_backoff(), Duration::from_millis(10));

        assert!(manager.wait(&shutdown).await);
        assert_eq!(manager.attempt(), 1);
        assert_eq!(manager.current_backoff(), Duration::from_millis(20));

        assert!(manager.wait(&shutdown).await);
        assert!(manager.wait(&shutdown).await);
        assert_eq!(manager.current_backoff(), Duration::from_millis(80));

        assert!(manager.wait(&shutdown).await);
        assert_eq!(manager.attempt(), 4);
        // Should cap at max_backoff
        assert_eq!(manager.current_backoff(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_reconnect_reset() {
        let config = ReconnectConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        };

        let shutdown = CancellationToken::new();
        let mut manager = ReconnectManager::new(config);

        assert!(manager.wait(&shutdown).await);
        assert!(manager.wait(&shutdown).await);

        assert_eq!(manager.attempt(), 2);

        manager.reset();

        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.current_backoff(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_interrupted_by_shutdown() {
        let shutdown = CancellationToken::new();
        let mut manager = ReconnectManager::new(ReconnectConfig {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        });

        let stop = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            stop.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!manager.wait(&shutdown).await);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.current_backoff(), Duration::from_secs(10));
    }
}
