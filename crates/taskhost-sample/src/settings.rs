//! Sample host configuration
//!
//! Settings come from a JSON file named by `TASKHOST_SETTINGS`, falling back
//! to [`default_settings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use taskhost::{BackgroundTaskHostSettings, PropertyMap, TaskProcessorConfig};

use crate::{task_types, REQUEST_QUEUE, RESPONSE_QUEUE};

/// Name of the processor resized by the sample run
pub const PROCESSOR_NAME: &str = "Processor";

/// Sample binary configuration
#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// JSON settings file; built-in settings when absent
    pub settings_path: Option<PathBuf>,
    /// Time spent in each phase (before and after reconfiguration)
    pub phase_duration: Duration,
    /// Processor instance count applied by the reconfiguration
    pub scaled_instance_count: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            settings_path: None,
            phase_duration: Duration::from_secs(5),
            scaled_instance_count: 3,
        }
    }
}

impl SampleConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TASKHOST_SETTINGS`: Path to a JSON settings file
    /// - `TASKHOST_RUN_SECONDS`: Seconds per phase (default: 5)
    /// - `TASKHOST_SCALED_INSTANCES`: Processor instances after reconfiguration (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            settings_path: std::env::var("TASKHOST_SETTINGS").ok().map(PathBuf::from),
            phase_duration: std::env::var("TASKHOST_RUN_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.phase_duration),
            scaled_instance_count: std::env::var("TASKHOST_SCALED_INSTANCES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.scaled_instance_count),
        }
    }

    /// Settings from the configured file, or the built-in ones
    pub fn settings(&self) -> Result<BackgroundTaskHostSettings> {
        match &self.settings_path {
            Some(path) => load_settings(path),
            None => Ok(default_settings()),
        }
    }
}

/// Built-in calculator settings
pub fn default_settings() -> BackgroundTaskHostSettings {
    let default_context: PropertyMap = [("BatchSize".to_string(), json!(10))].into();

    BackgroundTaskHostSettings::new(
        default_context,
        vec![
            TaskProcessorConfig::new("Producer", task_types::PRODUCER)
                .with_trigger_interval(Duration::from_millis(500)),
            TaskProcessorConfig::new("Poisoner", task_types::POISONER)
                .with_trigger_interval(Duration::from_secs(2)),
            TaskProcessorConfig::new(PROCESSOR_NAME, task_types::PROCESSOR)
                .with_request_queue(REQUEST_QUEUE)
                .with_response_queue(RESPONSE_QUEUE),
            TaskProcessorConfig::new("Consumer", task_types::CONSUMER)
                .with_request_queue(RESPONSE_QUEUE),
        ],
    )
}

/// Read settings from a JSON file
pub fn load_settings(path: &Path) -> Result<BackgroundTaskHostSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let settings: BackgroundTaskHostSettings = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(settings)
}
