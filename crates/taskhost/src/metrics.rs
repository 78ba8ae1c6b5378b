//! Processing metrics
//!
//! The host reports through an injected [`MetricsSink`]; nothing here is a
//! process-wide singleton. [`OtelMetrics`] forwards to whatever meter
//! provider the application installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// Receives per-processor processing events
pub trait MetricsSink: Send + Sync + 'static {
    /// A message was processed and acknowledged (or a trigger run succeeded)
    fn task_processed(&self, processor: &str);

    /// A run failed and the message was left for redelivery
    fn task_failed(&self, _processor: &str) {}

    /// A poison message was removed from its request queue
    fn message_dead_lettered(&self, _processor: &str) {}
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn task_processed(&self, _processor: &str) {}
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Per-processor atomic counters
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, Counters>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, processor: &str, pick: impl Fn(&Counters) -> &AtomicU64) {
        if let Some(counters) = self.counters.get(processor) {
            pick(counters.value()).fetch_add(1, Ordering::Relaxed);
            return;
        }
        let counters = self.counters.entry(processor.to_string()).or_default();
        pick(counters.value()).fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self, processor: &str, pick: impl Fn(&Counters) -> &AtomicU64) -> u64 {
        self.counters
            .get(processor)
            .map(|c| pick(c.value()).load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Messages processed by one processor
    pub fn processed(&self, processor: &str) -> u64 {
        self.read(processor, |c| &c.processed)
    }

    /// Failed runs of one processor
    pub fn failed(&self, processor: &str) -> u64 {
        self.read(processor, |c| &c.failed)
    }

    /// Messages dead-lettered by one processor
    pub fn dead_lettered(&self, processor: &str) -> u64 {
        self.read(processor, |c| &c.dead_lettered)
    }

    /// Messages processed across every processor
    pub fn total_processed(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| c.processed.load(Ordering::Relaxed))
            .sum()
    }
}

impl std::fmt::Debug for InMemoryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetrics")
            .field("processors", &self.counters.len())
            .field("total_processed", &self.total_processed())
            .finish()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn task_processed(&self, processor: &str) {
        self.bump(processor, |c| &c.processed);
    }

    fn task_failed(&self, processor: &str) {
        self.bump(processor, |c| &c.failed);
    }

    fn message_dead_lettered(&self, processor: &str) {
        self.bump(processor, |c| &c.dead_lettered);
    }
}

/// Forwards every event to several sinks
#[derive(Default)]
pub struct FanoutMetrics {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for FanoutMetrics {
    fn task_processed(&self, processor: &str) {
        self.sinks.iter().for_each(|s| s.task_processed(processor));
    }

    fn task_failed(&self, processor: &str) {
        self.sinks.iter().for_each(|s| s.task_failed(processor));
    }

    fn message_dead_lettered(&self, processor: &str) {
        self.sinks.iter().for_each(|s| s.message_dead_lettered(processor));
    }
}

/// OpenTelemetry counters tagged with the processor name
pub struct OtelMetrics {
    processed: Counter<u64>,
    failed: Counter<u64>,
    dead_lettered: Counter<u64>,
}

impl OtelMetrics {
    /// Build counters on the global meter provider
    pub fn global() -> Self {
        Self::new(opentelemetry::global::meter("taskhost"))
    }

    pub fn new(meter: Meter) -> Self {
        Self {
            processed: meter
                .u64_counter("taskhost.tasks.processed")
                .with_description("Messages processed and acknowledged")
                .build(),
            failed: meter
                .u64_counter("taskhost.tasks.failed")
                .with_description("Task runs that failed and were left for redelivery")
                .build(),
            dead_lettered: meter
                .u64_counter("taskhost.messages.dead_lettered")
                .with_description("Poison messages removed from request queues")
                .build(),
        }
    }

    fn attributes(processor: &str) -> [KeyValue; 1] {
        [KeyValue::new("processor", processor.to_string())]
    }
}

impl MetricsSink for OtelMetrics {
    fn task_processed(&self, processor: &str) {
        self.processed.add(1, &Self::attributes(processor));
    }

    fn task_failed(&self, processor: &str) {
        self.failed.add(1, &Self::attributes(processor));
    }

    fn message_dead_lettered(&self, processor: &str) {
        self.dead_lettered.add(1, &Self::attributes(processor));
    }
}
