//! Background task host
//!
//! Owns one [`WorkerPool`] per configured processor and applies settings
//! snapshots to them. Start, stop and reconfigure are serialised by one
//! async mutex over the pool table; the current snapshot is readable
//! without taking it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use taskhost_queue::QueueProvider;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::{
    plan_changes, BackgroundTaskHostSettings, HostOptions, ProcessorChange, SettingsError,
    TaskProcessorConfig,
};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::registry::TaskRegistry;
use crate::worker::{PoolBuildError, PoolResources, WorkerPool, WorkerPoolError};

/// Host lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Running,
    Stopped,
}

/// A processor that could not be turned into a pool
#[derive(Debug, thiserror::Error)]
#[error("task processor '{processor}': {source}")]
pub struct ProcessorError {
    pub processor: String,
    #[source]
    pub source: PoolBuildError,
}

/// Host errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// `start` called on a running host
    #[error("task host is already running")]
    AlreadyRunning,

    /// Structurally invalid settings
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// One or more processors have invalid configuration
    #[error("{} task processor(s) failed to configure: {}", .0.len(), join_errors(.0))]
    Configuration(Vec<ProcessorError>),

    /// Pools still had in-flight runs at the shutdown deadline
    #[error("shutdown timed out for: {}", .processors.join(", "))]
    ShutdownTimeout { processors: Vec<String> },

    /// Pool lifecycle failure
    #[error(transparent)]
    Pool(#[from] WorkerPoolError),
}

fn join_errors(errors: &[ProcessorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct HostState {
    status: HostStatus,
    pools: HashMap<String, WorkerPool>,
}

/// Runs task processors as pools of queue-driven workers
///
/// # Example
///
/// ```ignore
/// let host = BackgroundTaskHost::new(settings, registry, queues)?
///     .with_metrics(metrics);
///
/// host.start().await?;
/// let next = host.configuration().with_instance_count("Processor", 3);
/// host.reconfigure(next).await?;
/// host.stop().await?;
/// ```
pub struct BackgroundTaskHost {
    registry: Arc<TaskRegistry>,
    queues: Arc<dyn QueueProvider>,
    metrics: Arc<dyn MetricsSink>,
    options: HostOptions,
    snapshot: RwLock<Arc<BackgroundTaskHostSettings>>,
    state: Mutex<HostState>,
}

impl BackgroundTaskHost {
    /// Create a stopped host
    pub fn new(
        settings: BackgroundTaskHostSettings,
        registry: TaskRegistry,
        queues: Arc<dyn QueueProvider>,
    ) -> Result<Self, HostError> {
        settings.validate()?;

        Ok(Self {
            registry: Arc::new(registry),
            queues,
            metrics: Arc::new(NoopMetrics),
            options: HostOptions::default(),
            snapshot: RwLock::new(Arc::new(settings)),
            state: Mutex::new(HostState {
                status: HostStatus::Stopped,
                pools: HashMap::new(),
            }),
        })
    }

    /// Set the metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set host options
    pub fn with_options(mut self, options: HostOptions) -> Self {
        self.options = options;
        self
    }

    /// Current settings snapshot
    pub fn configuration(&self) -> Arc<BackgroundTaskHostSettings> {
        self.snapshot.read().clone()
    }

    pub async fn status(&self) -> HostStatus {
        self.state.lock().await.status
    }

    /// Live workers of a processor, `None` if it has no pool
    pub async fn worker_count(&self, processor: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.pools.get(processor).map(WorkerPool::worker_count)
    }

    /// Names of processors with a running pool, sorted
    pub async fn pool_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.pools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start one pool per configured processor
    ///
    /// Processors with invalid configuration are reported together in
    /// [`HostError::Configuration`]; every valid processor is started
    /// regardless and the host is running afterwards.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), HostError> {
        let mut state = self.state.lock().await;
        if state.status == HostStatus::Running {
            return Err(HostError::AlreadyRunning);
        }
        self.options.validate()?;

        let settings = self.configuration();
        info!(processors = settings.processors.len(), "Starting task host");

        let mut failures = Vec::new();
        for config in &settings.processors {
            match self.build_pool(&settings, config) {
                Ok(mut pool) => {
                    pool.start()?;
                    state.pools.insert(config.name.clone(), pool);
                }
                Err(e) => {
                    error!(
                        processor = %config.name,
                        error = %e.source,
                        "Task processor not started"
                    );
                    failures.push(e);
                }
            }
        }

        state.status = HostStatus::Running;
        info!(pools = state.pools.len(), "Task host started");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HostError::Configuration(failures))
        }
    }

    /// Stop every pool, waiting for in-flight runs
    ///
    /// No-op on a stopped host.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), HostError> {
        let mut state = self.state.lock().await;
        if state.status == HostStatus::Stopped {
            return Ok(());
        }

        info!("Stopping task host");
        let pools: Vec<WorkerPool> = state.pools.drain().map(|(_, pool)| pool).collect();
        state.status = HostStatus::Stopped;

        let results = futures::future::join_all(pools.into_iter().map(|mut pool| async move {
            let result = pool.shutdown().await;
            (pool.config().name.clone(), result)
        }))
        .await;

        let timed_out = collect_timeouts(results);
        info!("Task host stopped");

        if timed_out.is_empty() {
            Ok(())
        } else {
            Err(HostError::ShutdownTimeout {
                processors: timed_out,
            })
        }
    }

    /// Apply a new settings snapshot
    ///
    /// The whole snapshot is validated before any pool changes; on error
    /// the running pools and the current snapshot are left untouched. Only
    /// processors that actually changed are disturbed: instance-count-only
    /// changes resize in place, other changes drain the old pool and start
    /// a new one. A processor that has no live pool (it failed to start) is
    /// built like a new one. A stopped host only records the snapshot.
    #[instrument(skip(self, settings))]
    pub async fn reconfigure(
        &self,
        settings: BackgroundTaskHostSettings,
    ) -> Result<(), HostError> {
        settings.validate()?;
        self.options.validate()?;
        let mut state = self.state.lock().await;
        let current = self.configuration();
        let mut changes = plan_changes(&current, &settings);
        if state.status == HostStatus::Running {
            changes = changes
                .into_iter()
                .map(|change| restore_missing_pool(change, &settings, &state.pools))
                .collect();
        }

        let mut prepared: HashMap<String, WorkerPool> = HashMap::new();
        let mut failures = Vec::new();
        for change in &changes {
            if let ProcessorChange::Add(config) | ProcessorChange::Replace(config) = change {
                match self.build_pool(&settings, config) {
                    Ok(pool) => {
                        prepared.insert(config.name.clone(), pool);
                    }
                    Err(e) => failures.push(e),
                }
            }
        }
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Reconfiguration rejected");
            return Err(HostError::Configuration(failures));
        }

        *self.snapshot.write() = Arc::new(settings);

        if state.status == HostStatus::Stopped {
            info!("Task host stopped, snapshot recorded");
            return Ok(());
        }

        let mut timed_out = Vec::new();
        let mut retired = Vec::new();
        for change in &changes {
            match change {
                ProcessorChange::Remove(name) => {
                    info!(processor = %name, "Removing task processor");
                    retired.extend(state.pools.remove(name));
                }
                ProcessorChange::Replace(config) => {
                    info!(processor = %config.name, "Replacing task processor");
                    retired.extend(state.pools.remove(&config.name));
                }
                _ => {}
            }
        }
        for mut pool in retired {
            if let Err(WorkerPoolError::ShutdownTimeout { processor, .. }) = pool.shutdown().await {
                timed_out.push(processor);
            }
        }

        for change in changes {
            match change {
                ProcessorChange::Resize { name, to, .. } => {
                    if let Some(pool) = state.pools.get_mut(&name) {
                        if let Err(WorkerPoolError::ShutdownTimeout { processor, .. }) =
                            pool.resize(to).await
                        {
                            timed_out.push(processor);
                        }
                    }
                }
                ProcessorChange::Add(config) | ProcessorChange::Replace(config) => {
                    if let Some(mut pool) = prepared.remove(&config.name) {
                        pool.start()?;
                        state.pools.insert(config.name, pool);
                    }
                }
                ProcessorChange::Unchanged(_) | ProcessorChange::Remove(_) => {}
            }
        }

        info!(pools = state.pools.len(), "Task host reconfigured");

        if timed_out.is_empty() {
            Ok(())
        } else {
            Err(HostError::ShutdownTimeout {
                processors: timed_out,
            })
        }
    }

    fn build_pool(
        &self,
        settings: &BackgroundTaskHostSettings,
        config: &TaskProcessorConfig,
    ) -> Result<WorkerPool, ProcessorError> {
        let resources = PoolResources::resolve(
            config,
            &settings.default_context,
            &self.registry,
            &self.queues,
            &self.options.poison,
        )
        .map_err(|source| ProcessorError {
            processor: config.name.clone(),
            source,
        })?;

        Ok(WorkerPool::new(
            config.clone(),
            resources,
            self.options.clone(),
            Arc::clone(&self.metrics),
        ))
    }
}

/// Turn a resize or no-op for a processor without a live pool into an add
///
/// A processor that failed to start has no pool; applying the new snapshot
/// must still leave it running with the configured workers.
fn restore_missing_pool(
    change: ProcessorChange,
    settings: &BackgroundTaskHostSettings,
    pools: &HashMap<String, WorkerPool>,
) -> ProcessorChange {
    let name = match &change {
        ProcessorChange::Unchanged(name) | ProcessorChange::Resize { name, .. } => name,
        _ => return change,
    };
    if pools.contains_key(name) {
        return change;
    }
    match settings.processor(name) {
        Some(config) => {
            info!(processor = %name, "Starting task processor without a live pool");
            ProcessorChange::Add(config.clone())
        }
        None => change,
    }
}

fn collect_timeouts(results: Vec<(String, Result<(), WorkerPoolError>)>) -> Vec<String> {
    results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(processor = %name, error = %e, "Pool did not stop cleanly");
                Some(name)
            }
        })
        .collect()
}

impl std::fmt::Debug for BackgroundTaskHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskHost")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("settings", &self.configuration())
            .finish()
    }
}
