//! Host settings snapshot

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::duration_millis;

/// Property bag (name to JSON value)
pub type PropertyMap = BTreeMap<String, Value>;

/// Merge processor properties over the default context
pub fn effective_properties(
    default_context: &PropertyMap,
    properties: &PropertyMap,
) -> PropertyMap {
    let mut merged = default_context.clone();
    merged.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// A processor has an empty name
    #[error("task processor name must not be empty")]
    EmptyProcessorName,

    /// Two processors share a name
    #[error("duplicate task processor name: {0}")]
    DuplicateProcessor(String),

    /// Poison threshold of zero would dead-letter every message
    #[error("task processor '{0}' has a poison threshold of zero")]
    InvalidPoisonThreshold(String),

    /// Trigger-driven processor with a zero interval
    #[error("task processor '{0}' has a zero trigger interval")]
    ZeroTriggerInterval(String),

    /// Host-wide option out of range
    #[error("invalid host option {option}: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: &'static str,
    },
}

/// Poison-message policy
///
/// A message whose dequeue count exceeds `max_dequeue_count` is
/// dead-lettered: logged, forwarded to `dead_letter_queue` when one is
/// configured, and deleted from the request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonPolicy {
    /// Deliveries allowed before a message counts as poison
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,

    /// Queue key receiving dead-lettered bodies
    #[serde(default)]
    pub dead_letter_queue: Option<String>,
}

fn default_max_dequeue_count() -> u32 {
    5
}

impl Default for PoisonPolicy {
    fn default() -> Self {
        Self {
            max_dequeue_count: default_max_dequeue_count(),
            dead_letter_queue: None,
        }
    }
}

impl PoisonPolicy {
    /// Set the poison threshold
    pub fn with_max_dequeue_count(mut self, count: u32) -> Self {
        self.max_dequeue_count = count;
        self
    }

    /// Set the dead-letter queue key
    pub fn with_dead_letter_queue(mut self, key: impl Into<String>) -> Self {
        self.dead_letter_queue = Some(key.into());
        self
    }
}

/// Configuration of one task processor (one worker pool)
///
/// Immutable value: reconfiguration replaces whole snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProcessorConfig {
    /// Unique processor name
    pub name: String,

    /// Registered task type
    pub task_type: String,

    /// Number of concurrent workers (0 keeps the pool idle)
    #[serde(default = "default_instance_count")]
    pub instance_count: usize,

    /// Processor-specific properties
    #[serde(default)]
    pub properties: PropertyMap,

    /// Queue the workers lease messages from; none means trigger-driven
    #[serde(default)]
    pub request_queue: Option<String>,

    /// Queue receiving converted results
    #[serde(default)]
    pub response_queue: Option<String>,

    /// Period between runs of a trigger-driven processor
    #[serde(
        rename = "trigger_interval_ms",
        default = "default_trigger_interval",
        with = "duration_millis"
    )]
    pub trigger_interval: Duration,

    /// Overrides the host's poison policy
    #[serde(default)]
    pub poison: Option<PoisonPolicy>,
}

fn default_instance_count() -> usize {
    1
}

fn default_trigger_interval() -> Duration {
    Duration::from_secs(1)
}

impl TaskProcessorConfig {
    /// Create a processor configuration with one instance
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            instance_count: default_instance_count(),
            properties: PropertyMap::new(),
            request_queue: None,
            response_queue: None,
            trigger_interval: default_trigger_interval(),
            poison: None,
        }
    }

    /// Set the instance count
    pub fn with_instance_count(mut self, count: usize) -> Self {
        self.instance_count = count;
        self
    }

    /// Add a property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the request queue key
    pub fn with_request_queue(mut self, key: impl Into<String>) -> Self {
        self.request_queue = Some(key.into());
        self
    }

    /// Set the response queue key
    pub fn with_response_queue(mut self, key: impl Into<String>) -> Self {
        self.response_queue = Some(key.into());
        self
    }

    /// Set the trigger interval
    pub fn with_trigger_interval(mut self, interval: Duration) -> Self {
        self.trigger_interval = interval;
        self
    }

    /// Set a processor-specific poison policy
    pub fn with_poison_policy(mut self, policy: PoisonPolicy) -> Self {
        self.poison = Some(policy);
        self
    }

    /// True when both configurations differ at most in instance count
    pub fn same_except_instance_count(&self, other: &Self) -> bool {
        Self {
            instance_count: other.instance_count,
            ..self.clone()
        } == *other
    }
}

/// Full point-in-time configuration of a task host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTaskHostSettings {
    /// Properties inherited by every processor
    #[serde(default)]
    pub default_context: PropertyMap,

    /// Processors in configuration order
    #[serde(default)]
    pub processors: Vec<TaskProcessorConfig>,
}

impl BackgroundTaskHostSettings {
    /// Create a settings snapshot
    pub fn new(default_context: PropertyMap, processors: Vec<TaskProcessorConfig>) -> Self {
        Self {
            default_context,
            processors,
        }
    }

    /// Processors in configuration order
    pub fn task_processors(&self) -> &[TaskProcessorConfig] {
        &self.processors
    }

    /// Find a processor by name
    pub fn processor(&self, name: &str) -> Option<&TaskProcessorConfig> {
        self.processors.iter().find(|p| p.name == name)
    }

    /// Copy of this snapshot with one processor's instance count changed
    pub fn with_instance_count(&self, name: &str, count: usize) -> Self {
        let mut settings = self.clone();
        for processor in settings.processors.iter_mut().filter(|p| p.name == name) {
            processor.instance_count = count;
        }
        settings
    }

    /// Effective properties of a processor
    pub fn effective_properties(&self, processor: &TaskProcessorConfig) -> PropertyMap {
        effective_properties(&self.default_context, &processor.properties)
    }

    /// Check structural validity
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut names = HashSet::new();
        for processor in &self.processors {
            if processor.name.trim().is_empty() {
                return Err(SettingsError::EmptyProcessorName);
            }
            if !names.insert(processor.name.as_str()) {
                return Err(SettingsError::DuplicateProcessor(processor.name.clone()));
            }
            if matches!(&processor.poison, Some(policy) if policy.max_dequeue_count == 0) {
                return Err(SettingsError::InvalidPoisonThreshold(
                    processor.name.clone(),
                ));
            }
            if processor.request_queue.is_none() && processor.trigger_interval.is_zero() {
                return Err(SettingsError::ZeroTriggerInterval(processor.name.clone()));
            }
        }
        Ok(())
    }
}
