use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::sink::class::EventClass;
use crate::sink::group::Grouping;

const NAMESPACE: &str = "pumpsync";

/// Prometheus metrics for one sync run.
///
/// All metrics use the "pumpsync" namespace.
pub struct SyncMetrics {
    registry: Registry,

    /// Total pump events decoded from the feed.
    pub events_decoded: Counter,
    /// Decoded events whose id maps to no class.
    pub events_unclassified: Counter,
    /// Classified events by class.
    pub events_by_class: CounterVec,
    /// Entries written to the destination by class.
    pub entries_written: CounterVec,
    /// Populated classes skipped by class and reason (disabled/unregistered).
    pub classes_skipped: CounterVec,
    /// Processor failures by processor name.
    pub processor_failures: CounterVec,
    /// Updater runs by updater name and outcome.
    pub updater_runs: CounterVec,
    /// Source API requests by endpoint and status.
    pub source_requests_total: CounterVec,
    /// Source request duration by endpoint.
    pub source_request_duration: HistogramVec,
    /// End-to-end duration of one time range run.
    pub run_duration: Histogram,
    /// Newest event timestamp seen in the last run, as unix seconds.
    pub last_event_timestamp: Gauge,
}

impl SyncMetrics {
    /// Creates a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_decoded = Counter::with_opts(
            Opts::new("events_decoded_total", "Total pump events decoded.").namespace(NAMESPACE),
        )?;
        let events_unclassified = Counter::with_opts(
            Opts::new(
                "events_unclassified_total",
                "Total decoded events with no class.",
            )
            .namespace(NAMESPACE),
        )?;
        let events_by_class = CounterVec::new(
            Opts::new("events_by_class_total", "Total classified events by class.")
                .namespace(NAMESPACE),
            &["class"],
        )?;
        let entries_written = CounterVec::new(
            Opts::new(
                "entries_written_total",
                "Total entries written to the destination by class.",
            )
            .namespace(NAMESPACE),
            &["class"],
        )?;
        let classes_skipped = CounterVec::new(
            Opts::new(
                "classes_skipped_total",
                "Populated classes not processed by class and reason.",
            )
            .namespace(NAMESPACE),
            &["class", "reason"],
        )?;
        let processor_failures = CounterVec::new(
            Opts::new(
                "processor_failures_total",
                "Total processor failures by processor.",
            )
            .namespace(NAMESPACE),
            &["processor"],
        )?;
        let updater_runs = CounterVec::new(
            Opts::new(
                "updater_runs_total",
                "Total updater runs by updater and outcome.",
            )
            .namespace(NAMESPACE),
            &["updater", "outcome"],
        )?;
        let source_requests_total = CounterVec::new(
            Opts::new(
                "source_requests_total",
                "Total pump feed API requests by endpoint and status.",
            )
            .namespace(NAMESPACE),
            &["endpoint", "status"],
        )?;
        let source_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "source_request_duration_seconds",
                "Pump feed API request duration by endpoint.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0]),
            &["endpoint"],
        )?;
        let run_duration = Histogram::with_opts(
            HistogramOpts::new("run_duration_seconds", "Duration of one time range sync.")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;
        let last_event_timestamp = Gauge::with_opts(
            Opts::new(
                "last_event_timestamp_seconds",
                "Newest pump event timestamp seen, as unix seconds.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(events_decoded.clone()))?;
        registry.register(Box::new(events_unclassified.clone()))?;
        registry.register(Box::new(events_by_class.clone()))?;
        registry.register(Box::new(entries_written.clone()))?;
        registry.register(Box::new(classes_skipped.clone()))?;
        registry.register(Box::new(processor_failures.clone()))?;
        registry.register(Box::new(updater_runs.clone()))?;
        registry.register(Box::new(source_requests_total.clone()))?;
        registry.register(Box::new(source_request_duration.clone()))?;
        registry.register(Box::new(run_duration.clone()))?;
        registry.register(Box::new(last_event_timestamp.clone()))?;

        Ok(Self {
            registry,
            events_decoded,
            events_unclassified,
            events_by_class,
            entries_written,
            classes_skipped,
            processor_failures,
            updater_runs,
            source_requests_total,
            source_request_duration,
            run_duration,
            last_event_timestamp,
        })
    }

    /// Record the shape of a grouped batch.
    pub fn record_grouping(&self, grouping: &Grouping) {
        self.events_decoded.inc_by(grouping.decoded as f64);
        self.events_unclassified.inc_by(grouping.unclassified as f64);
        for (class, n) in grouping.groups.counts() {
            self.events_by_class
                .with_label_values(&[class.as_str()])
                .inc_by(n as f64);
        }
        if let Some(window) = grouping.window {
            self.last_event_timestamp
                .set(window.end_time().timestamp() as f64);
        }
    }

    pub fn record_written(&self, class: EventClass, written: usize) {
        self.entries_written
            .with_label_values(&[class.as_str()])
            .inc_by(written as f64);
    }

    pub fn record_skipped(&self, class: EventClass, reason: &str) {
        self.classes_skipped
            .with_label_values(&[class.as_str(), reason])
            .inc();
    }

    pub fn record_processor_failure(&self, processor: &str) {
        self.processor_failures
            .with_label_values(&[processor])
            .inc();
    }

    pub fn record_updater(&self, updater: &str, outcome: &str) {
        self.updater_runs
            .with_label_values(&[updater, outcome])
            .inc();
    }

    /// Record a source request; matches the feed client's metrics callback.
    pub fn record_source_request(&self, endpoint: &str, status: &str, duration: Duration) {
        self.source_requests_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.source_request_duration
            .with_label_values(&[endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }
}
