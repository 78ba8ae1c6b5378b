//! Host lifecycle tests against the in-memory queue provider

use std::sync::Arc;
use std::time::Duration;

use taskhost::prelude::*;
use taskhost::worker::PoolBuildError;
use taskhost::{HostStatus, PollerConfig, ProcessorError, SettingsError};
use taskhost_queue::InMemoryNamedQueue;

struct EchoTask {
    suffix: String,
}

#[async_trait]
impl Task for EchoTask {
    type Argument = String;
    type Output = String;

    fn setup(&mut self, ctx: &TaskExecutionContext) -> Result<(), TaskError> {
        self.suffix = ctx.get_property("Suffix", String::new());
        Ok(())
    }

    async fn run(
        &mut self,
        _ctx: &TaskExecutionContext,
        body: String,
    ) -> Result<String, TaskError> {
        Ok(format!("{body}{}", self.suffix))
    }
}

struct IdleTask;

#[async_trait]
impl Task for IdleTask {
    type Argument = ();
    type Output = ();

    async fn run(&mut self, _ctx: &TaskExecutionContext, _: ()) -> Result<(), TaskError> {
        Ok(())
    }
}

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register_queue_task(
            "Echo",
            || EchoTask {
                suffix: String::new(),
            },
            StringConverter,
            StringConverter,
        )
        .register_trigger_task("Idle", || IdleTask);
    registry
}

fn echo(name: &str) -> TaskProcessorConfig {
    TaskProcessorConfig::new(name, "Echo")
        .with_request_queue(format!("{name}-in"))
        .with_response_queue(format!("{name}-out"))
}

fn options() -> HostOptions {
    HostOptions::default()
        .with_poller(
            PollerConfig::new()
                .with_min_interval(Duration::from_millis(5))
                .with_max_interval(Duration::from_millis(20)),
        )
        .with_visibility_timeout(Duration::from_millis(200))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn host(
    processors: Vec<TaskProcessorConfig>,
    queues: &Arc<InMemoryQueueProvider>,
) -> (BackgroundTaskHost, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let host = BackgroundTaskHost::new(
        BackgroundTaskHostSettings::new(PropertyMap::new(), processors),
        registry(),
        queues.clone(),
    )
    .unwrap()
    .with_options(options())
    .with_metrics(metrics.clone());
    (host, metrics)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

async fn put(queue: &InMemoryNamedQueue, bodies: &[&str]) {
    for body in bodies {
        queue.put_message(body, Duration::ZERO).await.unwrap();
    }
}

#[tokio::test]
async fn test_start_process_stop() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, metrics) = host(vec![echo("a").with_instance_count(2)], &queues);
    let input = queues.get("a-in").unwrap();
    let output = queues.get("a-out").unwrap();
    put(&input, &["x", "y", "z"]).await;

    host.start().await.unwrap();
    assert_eq!(host.status().await, HostStatus::Running);
    assert_eq!(host.worker_count("a").await, Some(2));

    eventually(|| output.len() == 3).await;
    host.stop().await.unwrap();

    assert_eq!(host.status().await, HostStatus::Stopped);
    assert!(host.pool_names().await.is_empty());
    assert!(input.is_empty());
    assert_eq!(metrics.processed("a"), 3);

    let mut bodies = output.bodies();
    bodies.sort();
    assert_eq!(bodies, vec!["x", "y", "z"]);
}

#[tokio::test]
async fn test_start_twice_and_stop_twice() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a")], &queues);

    host.stop().await.unwrap();
    host.start().await.unwrap();
    assert!(matches!(host.start().await, Err(HostError::AlreadyRunning)));
    host.stop().await.unwrap();
    host.stop().await.unwrap();

    host.start().await.unwrap();
    assert_eq!(host.pool_names().await, vec!["a"]);
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_settings_rejected_at_construction() {
    let result = BackgroundTaskHost::new(
        BackgroundTaskHostSettings::new(PropertyMap::new(), vec![echo("a"), echo("a")]),
        registry(),
        Arc::new(InMemoryQueueProvider::new()),
    );
    assert!(matches!(
        result,
        Err(HostError::Settings(SettingsError::DuplicateProcessor(_)))
    ));
}

#[tokio::test]
async fn test_invalid_processor_does_not_block_others() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(
        vec![
            echo("good"),
            TaskProcessorConfig::new("unknown", "Missing").with_request_queue("q"),
            TaskProcessorConfig::new("no-queue", "Echo"),
        ],
        &queues,
    );
    let input = queues.get("good-in").unwrap();
    put(&input, &["still works"]).await;

    let Err(HostError::Configuration(failures)) = host.start().await else {
        panic!("expected configuration errors");
    };
    let names: Vec<_> = failures.iter().map(|f| f.processor.as_str()).collect();
    assert_eq!(names, vec!["unknown", "no-queue"]);
    assert!(matches!(
        failures[1],
        ProcessorError {
            source: PoolBuildError::MissingRequestQueue { .. },
            ..
        }
    ));

    assert_eq!(host.status().await, HostStatus::Running);
    assert_eq!(host.pool_names().await, vec!["good"]);
    eventually(|| input.is_empty()).await;
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_resizes_in_place() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, metrics) = host(vec![echo("a"), echo("b")], &queues);
    host.start().await.unwrap();

    let input = queues.get("a-in").unwrap();
    let output = queues.get("a-out").unwrap();
    let bodies: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    for body in &bodies {
        input.put_message(body, Duration::ZERO).await.unwrap();
    }

    let next = host.configuration().with_instance_count("a", 3);
    host.reconfigure(next).await.unwrap();
    assert_eq!(host.worker_count("a").await, Some(3));
    assert_eq!(host.worker_count("b").await, Some(1));
    assert_eq!(host.configuration().processor("a").unwrap().instance_count, 3);

    let next = host.configuration().with_instance_count("a", 1);
    host.reconfigure(next).await.unwrap();
    assert_eq!(host.worker_count("a").await, Some(1));

    eventually(|| input.is_empty()).await;
    host.stop().await.unwrap();

    // Nothing lost: every request produced a result
    let mut produced = output.bodies();
    produced.sort();
    produced.dedup();
    assert_eq!(produced.len(), 50);
    assert!(metrics.processed("a") >= 50);
}

#[tokio::test]
async fn test_reconfigure_replaces_changed_processor() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a"), echo("b")], &queues);
    host.start().await.unwrap();

    let a_in = queues.get("a-in").unwrap();
    let a_out = queues.get("a-out").unwrap();
    put(&a_in, &["first"]).await;
    eventually(|| a_out.len() == 1).await;

    let mut next = (*host.configuration()).clone();
    next.processors[0] = echo("a").with_property("Suffix", "!");
    host.reconfigure(next).await.unwrap();

    put(&a_in, &["second"]).await;
    eventually(|| a_out.len() == 2).await;
    host.stop().await.unwrap();

    assert_eq!(a_out.bodies(), vec!["first", "second!"]);
}

#[tokio::test]
async fn test_reconfigure_adds_and_removes() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a"), echo("b")], &queues);
    host.start().await.unwrap();

    let next = BackgroundTaskHostSettings::new(
        PropertyMap::new(),
        vec![
            echo("b"),
            TaskProcessorConfig::new("idle", "Idle").with_instance_count(2),
        ],
    );
    host.reconfigure(next).await.unwrap();

    assert_eq!(host.pool_names().await, vec!["b", "idle"]);
    assert_eq!(host.worker_count("a").await, None);
    assert_eq!(host.worker_count("idle").await, Some(2));
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_reconfigure_leaves_host_untouched() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a")], &queues);
    host.start().await.unwrap();
    let before = host.configuration();

    let next = BackgroundTaskHostSettings::new(
        PropertyMap::new(),
        vec![
            echo("a").with_instance_count(4),
            TaskProcessorConfig::new("bad", "Missing").with_request_queue("q"),
        ],
    );
    assert!(matches!(
        host.reconfigure(next).await,
        Err(HostError::Configuration(failures)) if failures.len() == 1
    ));

    assert_eq!(host.configuration(), before);
    assert_eq!(host.worker_count("a").await, Some(1));
    assert_eq!(host.pool_names().await, vec!["a"]);
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_starts_processor_that_failed_at_start() {
    let queues = Arc::new(InMemoryQueueProvider::with_queues(["p-in"]));
    let (host, _) = host(vec![echo("p")], &queues);

    assert!(matches!(
        host.start().await,
        Err(HostError::Configuration(failures)) if failures.len() == 1
    ));
    assert_eq!(host.worker_count("p").await, None);

    // Still unresolvable: the instance-count change is rejected as a whole
    let before = host.configuration();
    let scaled = host.configuration().with_instance_count("p", 3);
    assert!(matches!(
        host.reconfigure(scaled.clone()).await,
        Err(HostError::Configuration(_))
    ));
    assert_eq!(host.configuration(), before);
    assert_eq!(host.worker_count("p").await, None);

    // Once the queue exists the same snapshot yields exactly three workers
    let output = queues.create("p-out");
    host.reconfigure(scaled).await.unwrap();
    assert_eq!(host.worker_count("p").await, Some(3));

    put(&queues.get("p-in").unwrap(), &["hello"]).await;
    eventually(|| output.len() == 1).await;
    host.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_options_rejected_at_start() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a")], &queues);
    let host = host.with_options(
        options().with_poison_policy(PoisonPolicy::default().with_max_dequeue_count(0)),
    );

    assert!(matches!(
        host.start().await,
        Err(HostError::Settings(SettingsError::InvalidOption { .. }))
    ));
    assert_eq!(host.status().await, HostStatus::Stopped);
}

#[tokio::test]
async fn test_reconfigure_stopped_host_records_snapshot() {
    let queues = Arc::new(InMemoryQueueProvider::new());
    let (host, _) = host(vec![echo("a")], &queues);

    let next = host.configuration().with_instance_count("a", 2);
    host.reconfigure(next.clone()).await.unwrap();

    assert_eq!(*host.configuration(), next);
    assert!(host.pool_names().await.is_empty());

    host.start().await.unwrap();
    assert_eq!(host.worker_count("a").await, Some(2));
    host.stop().await.unwrap();
}
