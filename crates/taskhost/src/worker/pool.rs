//! Worker pool for one task processor
//!
//! A pool owns `instance_count` workers, each an independent tokio task that
//! leases messages (or waits for trigger ticks) and runs a fresh task
//! instance per message. Workers stop cooperatively: cancellation interrupts
//! a lease wait immediately but never an in-progress run.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use taskhost_queue::{NamedQueue, QueueError, QueueMessage, QueueProvider};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use super::poller::MessagePoller;
use crate::config::{HostOptions, PoisonPolicy, PropertyMap, TaskProcessorConfig};
use crate::metrics::MetricsSink;
use crate::registry::{AnyTask, RegistryError, TaskFailure, TaskMode, TaskRegistry};
use crate::task::TaskExecutionContext;

/// Lower bound on the wait between trigger ticks
const MIN_TRIGGER_INTERVAL: Duration = Duration::from_millis(1);

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Workers are running
    Running,
    /// Workers were told to stop and in-flight runs are finishing
    Draining,
    /// No workers
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Pool already started
    #[error("worker pool '{0}' is already running")]
    AlreadyRunning(String),

    /// In-flight runs outlived the shutdown timeout
    #[error("worker pool '{processor}' timed out with {remaining} worker(s) still running")]
    ShutdownTimeout { processor: String, remaining: usize },
}

/// Why a processor configuration cannot become a pool
#[derive(Debug, thiserror::Error)]
pub enum PoolBuildError {
    /// Task type not registered
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Queue-driven task without a request queue
    #[error("task type '{task_type}' is queue-driven but no request queue is configured")]
    MissingRequestQueue { task_type: String },

    /// Trigger-driven task configured with a request queue
    #[error("task type '{task_type}' is trigger-driven and cannot consume queue '{queue}'")]
    UnexpectedRequestQueue { task_type: String, queue: String },

    /// Queue key could not be resolved
    #[error("queue '{key}' is unavailable: {source}")]
    Queue {
        key: String,
        #[source]
        source: QueueError,
    },
}

/// Everything a pool needs, resolved and validated up front
pub struct PoolResources {
    pub task: Arc<dyn AnyTask>,
    pub context: TaskExecutionContext,
    pub request_queue: Option<Arc<dyn NamedQueue>>,
    pub response_queue: Option<Arc<dyn NamedQueue>>,
    pub dead_letter_queue: Option<Arc<dyn NamedQueue>>,
    pub poison: PoisonPolicy,
}

impl PoolResources {
    /// Resolve task type, queues and context for a processor
    ///
    /// Fails without side effects, so it can validate a whole settings
    /// snapshot before any pool is touched.
    pub fn resolve(
        config: &TaskProcessorConfig,
        default_context: &PropertyMap,
        registry: &TaskRegistry,
        queues: &Arc<dyn QueueProvider>,
        default_poison: &PoisonPolicy,
    ) -> Result<Self, PoolBuildError> {
        let task = registry.resolve(&config.task_type)?;

        match (task.mode(), &config.request_queue) {
            (TaskMode::Queue, None) => {
                return Err(PoolBuildError::MissingRequestQueue {
                    task_type: config.task_type.clone(),
                })
            }
            (TaskMode::Trigger, Some(queue)) => {
                return Err(PoolBuildError::UnexpectedRequestQueue {
                    task_type: config.task_type.clone(),
                    queue: queue.clone(),
                })
            }
            _ => {}
        }

        let poison = config.poison.clone().unwrap_or_else(|| default_poison.clone());
        let resolve = |key: &Option<String>| -> Result<_, PoolBuildError> {
            key.as_deref()
                .map(|key| {
                    queues.queue(key).map_err(|source| PoolBuildError::Queue {
                        key: key.to_string(),
                        source,
                    })
                })
                .transpose()
        };

        Ok(Self {
            context: TaskExecutionContext::new(
                config.name.clone(),
                default_context,
                &config.properties,
                Arc::clone(queues),
            ),
            request_queue: resolve(&config.request_queue)?,
            response_queue: resolve(&config.response_queue)?,
            dead_letter_queue: resolve(&poison.dead_letter_queue)?,
            poison,
            task,
        })
    }
}

/// Read-only state shared by the workers of one pool
struct PoolRuntime {
    processor: String,
    resources: PoolResources,
    options: HostOptions,
    trigger_interval: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl PoolRuntime {
    async fn run_worker(self: Arc<Self>, cancel: CancellationToken) {
        match self.resources.request_queue.clone() {
            Some(queue) => self.queue_loop(queue, cancel).await,
            None => self.trigger_loop(cancel).await,
        }
        debug!("Worker exited");
    }

    async fn queue_loop(&self, queue: Arc<dyn NamedQueue>, cancel: CancellationToken) {
        let mut poller = MessagePoller::new(
            Arc::clone(&queue),
            self.options.poller.clone(),
            self.options.visibility_timeout,
            cancel,
        );

        while !poller.is_cancelled() {
            match poller.poll().await {
                Ok(Some(message)) => {
                    self.handle_message(queue.as_ref(), message).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(queue = %queue.name(), error = %e, "Failed to lease message"),
            }

            if poller.wait().await {
                break;
            }
        }
    }

    async fn trigger_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.resources.task.execute(&self.resources.context, None).await {
                Ok(_) => self.metrics.task_processed(&self.processor),
                Err(failure) => {
                    warn!(error = %failure, "Triggered run failed");
                    self.metrics.task_failed(&self.processor);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.trigger_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn handle_message(&self, queue: &dyn NamedQueue, message: QueueMessage) {
        let threshold = self.resources.poison.max_dequeue_count;
        if message.dequeue_count > threshold {
            self.dead_letter(queue, &message, "dequeue count exceeded").await;
            return;
        }

        let outcome = self
            .resources
            .task
            .execute(&self.resources.context, Some(&message.body))
            .instrument(info_span!(
                "task",
                message_id = %message.id,
                dequeue_count = message.dequeue_count
            ))
            .await;

        match outcome {
            Ok(result) => self.complete(queue, &message, result).await,
            Err(failure) if failure.is_poison() && message.dequeue_count >= threshold => {
                self.dead_letter(queue, &message, &failure.to_string()).await;
            }
            Err(failure) => {
                self.report_failure(&message, &failure);
                self.metrics.task_failed(&self.processor);
            }
        }
    }

    fn report_failure(&self, message: &QueueMessage, failure: &TaskFailure) {
        warn!(
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            error = %failure,
            "Message left for redelivery"
        );
    }

    async fn complete(
        &self,
        queue: &dyn NamedQueue,
        message: &QueueMessage,
        result: Option<String>,
    ) {
        if let (Some(response_queue), Some(body)) = (&self.resources.response_queue, result) {
            if let Err(e) = response_queue.put_message(&body, Duration::ZERO).await {
                error!(
                    message_id = %message.id,
                    queue = %response_queue.name(),
                    error = %e,
                    "Failed to publish result"
                );
                return;
            }
        }

        match queue.delete_message(message).await {
            Ok(()) => self.metrics.task_processed(&self.processor),
            Err(QueueError::LeaseLost(id)) => {
                warn!(message_id = %id, "Lease expired before acknowledgement");
            }
            Err(e) => error!(message_id = %message.id, error = %e, "Failed to delete message"),
        }
    }

    async fn dead_letter(&self, queue: &dyn NamedQueue, message: &QueueMessage, reason: &str) {
        warn!(
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            body = %message.body,
            reason,
            "Dead-lettering poison message"
        );

        if let Some(dlq) = &self.resources.dead_letter_queue {
            if let Err(e) = dlq.put_message(&message.body, Duration::ZERO).await {
                error!(message_id = %message.id, error = %e, "Failed to forward poison message");
                return;
            }
        }

        match queue.delete_message(message).await {
            Ok(()) => self.metrics.message_dead_lettered(&self.processor),
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Failed to delete poison message");
            }
        }
    }
}

struct WorkerHandle {
    id: usize,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Workers of one task processor
///
/// # Example
///
/// ```ignore
/// let resources = PoolResources::resolve(&config, &defaults, &registry, &queues, &poison)?;
/// let mut pool = WorkerPool::new(config, resources, options, metrics);
/// pool.start()?;
/// pool.resize(3).await?;
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    config: TaskProcessorConfig,
    runtime: Arc<PoolRuntime>,
    pool_token: CancellationToken,
    workers: Vec<WorkerHandle>,
    status: WorkerPoolStatus,
    next_worker_id: usize,
}

impl WorkerPool {
    pub fn new(
        config: TaskProcessorConfig,
        resources: PoolResources,
        options: HostOptions,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let runtime = Arc::new(PoolRuntime {
            processor: config.name.clone(),
            trigger_interval: config.trigger_interval.max(MIN_TRIGGER_INTERVAL),
            resources,
            options,
            metrics,
        });

        Self {
            config,
            runtime,
            pool_token: CancellationToken::new(),
            workers: Vec::new(),
            status: WorkerPoolStatus::Stopped,
            next_worker_id: 0,
        }
    }

    /// Spawn `instance_count` workers
    #[instrument(skip(self), fields(processor = %self.config.name))]
    pub fn start(&mut self) -> Result<(), WorkerPoolError> {
        if self.status != WorkerPoolStatus::Stopped {
            return Err(WorkerPoolError::AlreadyRunning(self.config.name.clone()));
        }

        info!(
            task_type = %self.config.task_type,
            instance_count = self.config.instance_count,
            "Starting worker pool"
        );

        self.pool_token = CancellationToken::new();
        for _ in 0..self.config.instance_count {
            self.spawn_worker();
        }
        self.status = WorkerPoolStatus::Running;
        Ok(())
    }

    /// Change the number of workers in place
    ///
    /// Surplus workers finish their current run and exit before this
    /// returns. On a stopped pool only the configured count changes.
    #[instrument(skip(self), fields(processor = %self.config.name))]
    pub async fn resize(&mut self, instance_count: usize) -> Result<(), WorkerPoolError> {
        let current = self.config.instance_count;
        self.config.instance_count = instance_count;

        if self.status != WorkerPoolStatus::Running || current == instance_count {
            return Ok(());
        }

        info!(from = current, to = instance_count, "Resizing worker pool");

        while self.workers.len() < instance_count {
            self.spawn_worker();
        }

        if self.workers.len() > instance_count {
            let surplus = self.workers.split_off(instance_count);
            for worker in &surplus {
                debug!(worker_id = worker.id, "Stopping surplus worker");
                worker.cancel.cancel();
            }
            self.join(surplus).await?;
        }

        Ok(())
    }

    /// Stop every worker and wait for in-flight runs
    #[instrument(skip(self), fields(processor = %self.config.name))]
    pub async fn shutdown(&mut self) -> Result<(), WorkerPoolError> {
        if self.status == WorkerPoolStatus::Stopped {
            return Ok(());
        }

        info!("Draining worker pool");
        self.status = WorkerPoolStatus::Draining;
        self.pool_token.cancel();

        let workers = std::mem::take(&mut self.workers);
        let result = self.join(workers).await;

        self.status = WorkerPoolStatus::Stopped;
        info!("Worker pool stopped");
        result
    }

    /// Workers currently alive
    pub fn worker_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    pub fn status(&self) -> WorkerPoolStatus {
        self.status
    }

    /// Configuration this pool runs with
    pub fn config(&self) -> &TaskProcessorConfig {
        &self.config
    }

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let cancel = self.pool_token.child_token();
        let span = info_span!("worker", processor = %self.config.name, worker_id = id);
        let handle = tokio::spawn(
            Arc::clone(&self.runtime)
                .run_worker(cancel.clone())
                .instrument(span),
        );

        debug!(worker_id = id, "Spawned worker");
        self.workers.push(WorkerHandle { id, cancel, handle });
    }

    /// Wait for cancelled workers, bounded by the shutdown timeout
    ///
    /// Workers still running at the deadline are detached, not aborted.
    async fn join(&self, workers: Vec<WorkerHandle>) -> Result<(), WorkerPoolError> {
        let count = workers.len();
        let handles = workers.into_iter().map(|w| w.handle);
        let timeout = self.runtime.options.shutdown_timeout;

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    error!(error = %result, "Worker terminated abnormally");
                }
                Ok(())
            }
            Err(_) => {
                warn!(workers = count, "Shutdown timeout reached");
                Err(WorkerPoolError::ShutdownTimeout {
                    processor: self.config.name.clone(),
                    remaining: count,
                })
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.pool_token.cancel();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("processor", &self.config.name)
            .field("status", &self.status)
            .field("workers", &self.workers.len())
            .finish()
    }
}
