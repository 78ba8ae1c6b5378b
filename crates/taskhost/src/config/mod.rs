//! Host configuration
//!
//! - [`BackgroundTaskHostSettings`] - immutable snapshot of all processors
//! - [`TaskProcessorConfig`] - one pool's configuration
//! - [`HostOptions`] - polling, leasing and shutdown knobs
//! - [`plan_changes`] - reconfiguration diff

mod diff;
pub(crate) mod duration_millis;
mod options;
mod settings;

pub use diff::{plan_changes, ProcessorChange};
pub use options::HostOptions;
pub use settings::{
    effective_properties, BackgroundTaskHostSettings, PoisonPolicy, PropertyMap, SettingsError,
    TaskProcessorConfig,
};
