//! # Background Task Host
//!
//! Runs named task processors as pools of workers that lease messages from
//! named queues, run a typed task per message, and publish results.
//!
//! ## Features
//!
//! - **Typed tasks**: `Task` is generic over argument and result, fed by
//!   explicit converter objects
//! - **At-least-once delivery**: failed runs are left for redelivery through
//!   the queue's visibility timeout; poison messages are dead-lettered
//! - **Live reconfiguration**: instance-count changes resize pools in place,
//!   other changes replace only the affected pool
//! - **Trigger-driven tasks**: processors without a request queue run on an
//!   interval
//! - **Observability**: `tracing` spans per worker and message, injected
//!   metrics sink, optional OTLP export
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BackgroundTaskHost                        │
//! │  (settings snapshot, pool table, start/stop/reconfigure)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one per processor
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  (instance_count workers, cooperative cancellation)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ lease / delete / publish
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 NamedQueue (taskhost-queue)                  │
//! │  (visibility timeout, dequeue count, pop receipts)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use taskhost::prelude::*;
//!
//! struct Square;
//!
//! #[async_trait]
//! impl Task for Square {
//!     type Argument = i64;
//!     type Output = i64;
//!
//!     async fn run(&mut self, _ctx: &TaskExecutionContext, n: i64) -> Result<i64, TaskError> {
//!         Ok(n * n)
//!     }
//! }
//!
//! let mut registry = TaskRegistry::new();
//! registry.register_queue_task("Square", || Square, FromStrConverter, DisplayConverter);
//!
//! let settings = BackgroundTaskHostSettings::new(
//!     PropertyMap::new(),
//!     vec![TaskProcessorConfig::new("Squares", "Square")
//!         .with_request_queue("numbers")
//!         .with_response_queue("squares")],
//! );
//!
//! let host = BackgroundTaskHost::new(settings, registry, queues)?;
//! host.start().await?;
//! ```

pub mod config;
pub mod host;
pub mod metrics;
pub mod registry;
pub mod task;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{
        BackgroundTaskHostSettings, HostOptions, PoisonPolicy, PropertyMap, TaskProcessorConfig,
    };
    pub use crate::host::{BackgroundTaskHost, HostError, HostStatus};
    pub use crate::metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
    pub use crate::registry::TaskRegistry;
    pub use crate::task::{
        ArgumentConverter, ConversionError, DisplayConverter, FromStrConverter, JsonConverter,
        NoResult, ResultConverter, StringConverter, Task, TaskError, TaskExecutionContext,
    };
    pub use async_trait::async_trait;
    pub use taskhost_queue::{InMemoryQueueProvider, NamedQueue, QueueProvider};
}

// Re-export key types at crate root
pub use config::{
    BackgroundTaskHostSettings, HostOptions, PoisonPolicy, PropertyMap, SettingsError,
    TaskProcessorConfig,
};
pub use host::{BackgroundTaskHost, HostError, HostStatus, ProcessorError};
pub use metrics::{FanoutMetrics, InMemoryMetrics, MetricsSink, NoopMetrics, OtelMetrics};
pub use registry::{AnyTask, RegistryError, TaskFailure, TaskMode, TaskRegistry};
pub use task::{Task, TaskError, TaskExecutionContext};
pub use worker::{PollerConfig, WorkerPoolError};
