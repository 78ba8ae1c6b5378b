//! Logging, tracing and metrics export for task hosts
//!
//! Console output goes through `tracing-subscriber`. When an OTLP endpoint
//! is configured, worker and message spans are exported as traces and the
//! global meter provider is backed by an OTLP exporter, so [`OtelMetrics`]
//! counters reach the collector.
//!
//! Every exported resource carries the service name and the host instance,
//! which tells apart several hosts running the same processors.
//!
//! [`OtelMetrics`]: crate::metrics::OtelMetrics

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
///
/// Per-poll queue tracing is noisy, so the queue crate stays at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "info,taskhost_queue=warn";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Telemetry settings for a host process
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute
    pub service_name: String,
    /// `taskhost.instance` resource attribute
    pub instance: Option<String>,
    /// OTLP gRPC endpoint; export is disabled without one
    pub otlp_endpoint: Option<String>,
    /// Fraction of root spans sampled, in `0.0..=1.0`
    pub trace_sample_ratio: f64,
    /// How often counters are pushed to the collector
    pub metrics_interval: Duration,
    /// `EnvFilter` directives
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "taskhost".to_string(),
            instance: None,
            otlp_endpoint: None,
            trace_sample_ratio: 1.0,
            metrics_interval: Duration::from_secs(30),
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the environment
    ///
    /// - `OTEL_SERVICE_NAME`
    /// - `TASKHOST_INSTANCE`
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`
    /// - `TASKHOST_TRACE_SAMPLE_RATIO` (default 1.0)
    /// - `TASKHOST_METRICS_INTERVAL_SECS` (default 30)
    /// - `RUST_LOG`, then `LOG_LEVEL`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self {
            service_name: var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            instance: var("TASKHOST_INSTANCE"),
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            trace_sample_ratio: var("TASKHOST_TRACE_SAMPLE_RATIO")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trace_sample_ratio),
            metrics_interval: var("TASKHOST_METRICS_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.metrics_interval),
            log_filter: var("RUST_LOG").or_else(|| var("LOG_LEVEL")),
        }
    }

    /// Use `name` unless `OTEL_SERVICE_NAME` chose one
    pub fn with_default_service_name(mut self, name: impl Into<String>) -> Self {
        if self.service_name == Self::default().service_name {
            self.service_name = name.into();
        }
        self
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new("service.name", self.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ];
        if let Some(instance) = &self.instance {
            attributes.push(KeyValue::new("taskhost.instance", instance.clone()));
        }
        Resource::builder().with_attributes(attributes).build()
    }

    fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }

    fn sample_ratio(&self) -> f64 {
        if self.trace_sample_ratio.is_finite() {
            self.trace_sample_ratio.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    fn sampler(&self) -> Sampler {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(self.sample_ratio())))
    }
}

/// Flushes and shuts down exporters when dropped
///
/// Hold it until the host has stopped so the final spans and counters of
/// the drain are exported.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether counters are exported through the global meter provider
    pub fn exports_metrics(&self) -> bool {
        self.meter_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down meter provider: {e:?}");
            }
        }
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {e:?}");
            }
        }
    }
}

/// Install the tracing subscriber and, with an endpoint, the OTLP exporters
///
/// Exporter failures are logged and the host keeps running with console
/// output only. A second call leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let mut guard = TelemetryGuard {
        tracer_provider: None,
        meter_provider: None,
    };
    let mut export_error = None;

    let otel_layer = config.otlp_endpoint.as_deref().and_then(|endpoint| {
        let resource = config.resource();

        match build_meter_provider(endpoint, resource.clone(), config.metrics_interval) {
            Ok(provider) => {
                opentelemetry::global::set_meter_provider(provider.clone());
                guard.meter_provider = Some(provider);
            }
            Err(e) => export_error = Some(format!("metrics: {e}")),
        }

        match build_tracer(endpoint, resource, config.sampler()) {
            Ok((provider, tracer)) => {
                guard.tracer_provider = Some(provider);
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            Err(e) => {
                export_error = Some(format!("traces: {e}"));
                None
            }
        }
    });

    let console_layer = tracing_subscriber::fmt::layer().with_filter(config.env_filter());

    if let Err(e) = tracing_subscriber::registry()
        .with(console_layer)
        .with(otel_layer)
        .try_init()
    {
        eprintln!("Tracing subscriber already installed: {e}");
    }

    match (&config.otlp_endpoint, export_error) {
        (Some(endpoint), None) => {
            tracing::info!(
                endpoint = %endpoint,
                service = %config.service_name,
                instance = config.instance.as_deref().unwrap_or("-"),
                "Exporting traces and metrics"
            );
        }
        (Some(endpoint), Some(error)) => {
            tracing::warn!(endpoint = %endpoint, %error, "OTLP export partly unavailable");
        }
        (None, _) => tracing::debug!("OTLP export disabled"),
    }

    guard
}

fn build_tracer(
    endpoint: &str,
    resource: Resource,
    sampler: Sampler,
) -> anyhow::Result<(SdkTracerProvider, Tracer)> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(sampler)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer("taskhost");
    Ok((provider, tracer))
}

fn build_meter_provider(
    endpoint: &str,
    resource: Resource,
    interval: Duration,
) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}
