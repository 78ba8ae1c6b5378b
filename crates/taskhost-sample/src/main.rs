use std::sync::Arc;

use anyhow::{Context, Result};
use taskhost::telemetry::{init_telemetry, TelemetryConfig};
use taskhost::{
    BackgroundTaskHost, FanoutMetrics, HostError, InMemoryMetrics, MetricsSink, OtelMetrics,
};
use taskhost_queue::{InMemoryQueueProvider, NamedQueue};
use taskhost_sample::settings::PROCESSOR_NAME;
use taskhost_sample::{sample_registry, SampleConfig, REQUEST_QUEUE, RESPONSE_QUEUE};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // OTEL_EXPORTER_OTLP_ENDPOINT enables trace and counter export
    let telemetry =
        init_telemetry(TelemetryConfig::from_env().with_default_service_name("taskhost-sample"));

    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let config = SampleConfig::from_env();
    let settings = config.settings().context("Failed to load host settings")?;

    let queues = Arc::new(InMemoryQueueProvider::new());
    for key in [REQUEST_QUEUE, RESPONSE_QUEUE] {
        queues
            .get(key)?
            .clear()
            .await
            .with_context(|| format!("Failed to clear queue {key}"))?;
    }

    let metrics = Arc::new(InMemoryMetrics::new());
    let sink: Arc<dyn MetricsSink> = if telemetry.exports_metrics() {
        Arc::new(
            FanoutMetrics::new()
                .with_sink(metrics.clone())
                .with_sink(Arc::new(OtelMetrics::global())),
        )
    } else {
        metrics.clone()
    };
    let host = BackgroundTaskHost::new(settings, sample_registry(), queues.clone())
        .context("Failed to create task host")?
        .with_metrics(sink);

    tracing::info!("Starting background task host");
    match host.start().await {
        Ok(()) => {}
        Err(HostError::Configuration(failures)) => {
            for failure in &failures {
                tracing::error!(error = %failure, "Task processor not started");
            }
        }
        Err(e) => return Err(e).context("Failed to start task host"),
    }

    tokio::time::sleep(config.phase_duration).await;

    let scaled = host
        .configuration()
        .with_instance_count(PROCESSOR_NAME, config.scaled_instance_count);
    host.reconfigure(scaled)
        .await
        .context("Failed to reconfigure task host")?;
    tracing::info!(
        processor = PROCESSOR_NAME,
        workers = ?host.worker_count(PROCESSOR_NAME).await,
        "Task host reconfigured"
    );

    tokio::select! {
        _ = tokio::time::sleep(config.phase_duration) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    tracing::info!("Stopping background task host");
    host.stop().await.context("Failed to stop task host")?;

    tracing::info!(
        processed = metrics.processed(PROCESSOR_NAME),
        consumed = metrics.processed("Consumer"),
        dead_lettered = metrics.dead_lettered(PROCESSOR_NAME),
        pending_requests = queues.get(REQUEST_QUEUE)?.len(),
        "Background task host finished"
    );
    drop(telemetry);
    Ok(())
}
