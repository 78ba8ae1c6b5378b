//! Message polling with exponential backoff
//!
//! Workers lease one message at a time. An empty queue grows the wait
//! between polls up to `max_interval`; a leased message resets it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskhost_queue::{NamedQueue, QueueError, QueueMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::duration_millis;

/// Lower bound on any wait between polls
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Wait after a poll that found a message
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Upper bound on the idle wait
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor applied on every empty poll
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier (clamped to at least 1.0)
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Leases messages from one request queue for one worker
pub struct MessagePoller {
    queue: Arc<dyn NamedQueue>,
    config: PollerConfig,
    visibility_timeout: Duration,
    current_interval: Duration,
    cancel: CancellationToken,
}

impl MessagePoller {
    pub fn new(
        queue: Arc<dyn NamedQueue>,
        config: PollerConfig,
        visibility_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            current_interval: config.min_interval.max(MIN_POLL_INTERVAL),
            config,
            visibility_timeout,
            cancel,
        }
    }

    /// Lease the next visible message
    ///
    /// Returns `Ok(None)` when the queue is empty or the worker was asked
    /// to stop. Errors also grow the backoff.
    pub async fn poll(&mut self) -> Result<Option<QueueMessage>, QueueError> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        match self.queue.get_message(self.visibility_timeout).await {
            Ok(Some(message)) => {
                self.reset_backoff();
                trace!(
                    queue = %self.queue.name(),
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    "Leased message"
                );
                Ok(Some(message))
            }
            Ok(None) => {
                self.increase_backoff();
                trace!(
                    interval_ms = self.current_interval.as_millis(),
                    "Queue empty, backing off"
                );
                Ok(None)
            }
            Err(e) => {
                self.increase_backoff();
                Err(e)
            }
        }
    }

    /// Sleep for the current interval
    ///
    /// Returns `true` if cancellation interrupted the wait.
    pub async fn wait(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = self.cancel.cancelled() => {
                debug!("Stop requested during poll wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval.max(MIN_POLL_INTERVAL);
    }

    fn increase_backoff(&mut self) {
        let multiplier = match self.config.backoff_multiplier {
            m if m.is_finite() && m >= 1.0 => m,
            _ => 1.0,
        };
        let max = self.config.max_interval.max(MIN_POLL_INTERVAL);
        let next = Duration::try_from_secs_f64(self.current_interval.as_secs_f64() * multiplier)
            .unwrap_or(max);
        self.current_interval = next.clamp(MIN_POLL_INTERVAL, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhost_queue::InMemoryNamedQueue;

    fn poller(queue: Arc<InMemoryNamedQueue>, cancel: CancellationToken) -> MessagePoller {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(400))
            .with_backoff_multiplier(2.0);
        MessagePoller::new(queue, config, Duration::from_secs(30), cancel)
    }

    #[test]
    fn test_config_builder() {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(10))
            .with_backoff_multiplier(0.5);

        assert_eq!(config.min_interval, Duration::from_millis(50));
        assert_eq!(config.max_interval, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 1.0);
    }

    #[tokio::test]
    async fn test_backoff_grows_and_caps() {
        let queue = Arc::new(InMemoryNamedQueue::new("requests"));
        let mut poller = poller(queue, CancellationToken::new());

        assert!(poller.poll().await.unwrap().is_none());
        assert_eq!(poller.current_interval(), Duration::from_millis(200));
        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_unchecked_config_does_not_panic() {
        let queue = Arc::new(InMemoryNamedQueue::new("requests"));
        let config = PollerConfig {
            min_interval: Duration::ZERO,
            max_interval: Duration::from_millis(50),
            backoff_multiplier: -1.0,
        };
        let mut poller =
            MessagePoller::new(queue, config, Duration::from_secs(30), CancellationToken::new());

        assert_eq!(poller.current_interval(), MIN_POLL_INTERVAL);
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), MIN_POLL_INTERVAL);

        poller.config.backoff_multiplier = f64::NAN;
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), MIN_POLL_INTERVAL);

        poller.config.backoff_multiplier = f64::MAX;
        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_message_resets_backoff() {
        let queue = Arc::new(InMemoryNamedQueue::new("requests"));
        let mut poller = poller(Arc::clone(&queue), CancellationToken::new());

        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        queue.put_message("1 + 1", Duration::ZERO).await.unwrap();

        let message = poller.poll().await.unwrap().unwrap();
        assert_eq!(message.body, "1 + 1");
        assert_eq!(poller.current_interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cancelled_poller_leases_nothing() {
        let queue = Arc::new(InMemoryNamedQueue::new("requests"));
        queue.put_message("1 + 1", Duration::ZERO).await.unwrap();
        let cancel = CancellationToken::new();
        let mut poller = poller(Arc::clone(&queue), cancel.clone());

        cancel.cancel();
        assert!(poller.is_cancelled());
        assert!(poller.poll().await.unwrap().is_none());
        assert!(poller.wait().await);
        assert_eq!(queue.visible_count(), 1);
    }
}
