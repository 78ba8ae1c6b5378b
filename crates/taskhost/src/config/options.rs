//! Host-wide worker options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{duration_millis, PoisonPolicy, SettingsError};
use crate::worker::PollerConfig;

/// Options shared by every pool of a host
///
/// # Example
///
/// ```
/// use taskhost::HostOptions;
/// use std::time::Duration;
///
/// let options = HostOptions::default()
///     .with_visibility_timeout(Duration::from_secs(60))
///     .with_shutdown_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOptions {
    /// Lease polling configuration
    #[serde(default)]
    pub poller: PollerConfig,

    /// How long a leased message stays hidden from other workers
    #[serde(with = "duration_millis")]
    pub visibility_timeout: Duration,

    /// Bound on waiting for in-flight runs when draining
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Poison policy for processors without their own
    #[serde(default)]
    pub poison: PoisonPolicy,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            visibility_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            poison: PoisonPolicy::default(),
        }
    }
}

impl HostOptions {
    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Set the lease visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the default poison policy
    pub fn with_poison_policy(mut self, policy: PoisonPolicy) -> Self {
        self.poison = policy;
        self
    }

    /// Reject values that would spin, panic or dead-letter every message
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |option, reason| Err(SettingsError::InvalidOption { option, reason });

        if self.poller.min_interval.is_zero() {
            return invalid("poller.min_interval", "must be positive");
        }
        if self.poller.max_interval < self.poller.min_interval {
            return invalid("poller.max_interval", "must not be below min_interval");
        }
        let multiplier = self.poller.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return invalid("poller.backoff_multiplier", "must be a finite number >= 1.0");
        }
        if self.visibility_timeout.is_zero() {
            return invalid("visibility_timeout", "must be positive");
        }
        if self.poison.max_dequeue_count == 0 {
            return invalid("poison.max_dequeue_count", "must be positive");
        }
        Ok(())
    }
}
