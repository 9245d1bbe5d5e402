//! Prometheus metrics export.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use super::{EvictionReason, MetricsSink};
use crate::types::Network;

/// Prometheus registry and collectors.
pub struct PrometheusMetrics {
    registry: Registry,

    // Source lifecycle
    pub sources_active: IntGauge,
    pub sources_admitted_total: IntCounterVec,
    pub sources_evicted_total: IntCounterVec,

    // Dials
    pub dials_total: IntCounterVec,
    pub dial_duration_seconds: HistogramVec,

    // Reconciliation
    pub polls_total: IntCounterVec,
    pub poll_duration_seconds: Histogram,
}

impl PrometheusMetrics {
    /// Create a new metrics instance with all collectors registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sources_active = IntGauge::new(
            "multihome_sources_active",
            "Number of sources in the active set",
        )?;
        let sources_admitted_total = IntCounterVec::new(
            Opts::new("multihome_sources_admitted_total", "Sources admitted into the active set"),
            &["source"],
        )?;
        let sources_evicted_total = IntCounterVec::new(
            Opts::new("multihome_sources_evicted_total", "Sources removed from the active set"),
            &["source", "reason"],
        )?;
        let dials_total = IntCounterVec::new(
            Opts::new("multihome_dials_total", "Dial attempts per source and outcome"),
            &["source", "network", "outcome"],
        )?;
        let dial_duration_seconds = HistogramVec::new(
            HistogramOpts::new("multihome_dial_duration_seconds", "Dial latency in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["source"],
        )?;
        let polls_total = IntCounterVec::new(
            Opts::new("multihome_polls_total", "Reconciliation cycles by outcome"),
            &["outcome"],
        )?;
        let poll_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "multihome_poll_duration_seconds",
                "Duration of a reconciliation cycle",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(sources_active.clone()))?;
        registry.register(Box::new(sources_admitted_total.clone()))?;
        registry.register(Box::new(sources_evicted_total.clone()))?;
        registry.register(Box::new(dials_total.clone()))?;
        registry.register(Box::new(dial_duration_seconds.clone()))?;
        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            sources_active,
            sources_admitted_total,
            sources_evicted_total,
            dials_total,
            dial_duration_seconds,
            polls_total,
            poll_duration_seconds,
        })
    }

    /// Encode metrics to Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_dial(&self, source: &str, network: Network, ok: bool, elapsed: Duration) {
        let outcome = if ok { "ok" } else { "error" };
        self.dials_total
            .with_label_values(&[source, network.as_str(), outcome])
            .inc();
        self.dial_duration_seconds
            .with_label_values(&[source])
            .observe(elapsed.as_secs_f64());
    }

    fn source_admitted(&self, source: &str) {
        self.sources_admitted_total.with_label_values(&[source]).inc();
    }

    fn source_evicted(&self, source: &str, reason: EvictionReason) {
        self.sources_evicted_total
            .with_label_values(&[source, reason.as_str()])
            .inc();
    }

    fn record_poll(&self, elapsed: Duration, ok: bool, active: usize) {
        let outcome = if ok { "ok" } else { "error" };
        self.polls_total.with_label_values(&[outcome]).inc();
        self.poll_duration_seconds.observe(elapsed.as_secs_f64());
        self.sources_active.set(active as i64);
    }
}
